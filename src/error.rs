//! Crate-wide error type.
//!
//! Only rate-limit denials and generation failures ever reach an HTTP
//! caller. Cache and analytics errors are logged where they happen and
//! swallowed.

use thiserror::Error;

/// Errors produced by the etymology service.
#[derive(Debug, Error)]
pub enum EtymologyError {
    /// Missing or malformed configuration (e.g. no Gemini API key).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The generation service rejected the request or returned an error payload.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Model output did not match the etymology schema.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generation did not finish within its time budget.
    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    /// Cache store failure (connectivity, query, decoding).
    #[error("Cache error: {0}")]
    Cache(String),

    /// Rate-limit backend failure. Callers fail open on this.
    #[error("Rate limiter error: {0}")]
    RateLimit(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EtymologyError>;
