//! HTTP surface: router, shared state and route handlers.

pub mod config;
pub mod middleware;
pub mod routes;
pub mod server;

pub use config::ServerConfig;
pub use server::{build_router, start_server, AppState};
