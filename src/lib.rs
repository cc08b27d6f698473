//! Etymology Explainer: word histories generated by an LLM, streamed to the
//! caller as they are produced and cached per `(word, era)`.
//!
//! - [`api`]: axum router, request orchestration and preview images
//! - [`providers`]: structured generation over the Gemini streaming API
//! - [`cache`]: Postgres and in-memory result stores
//! - [`ratelimit`]: per-client sliding-window limits (Upstash or in-process)
//! - [`client`]: lookup state machine and HTTP client for a running server

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod etymology;
pub mod health;
pub mod providers;
pub mod ratelimit;
pub mod utils;

pub use config::AppConfig;
pub use error::{EtymologyError, Result};
pub use etymology::{EtymologyRequest, EtymologyResult};
