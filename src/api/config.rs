//! HTTP server configuration types.

use serde::{Deserialize, Serialize};

/// Listener and request-limit settings for the API server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind (default: 127.0.0.1:3000).
    pub bind: String,
    /// Maximum accepted request body size in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            body_limit_bytes: 64 * 1024,
        }
    }
}
