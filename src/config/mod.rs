//! Process configuration, built once at startup.
//!
//! Everything comes from the environment (optionally seeded from a `.env`
//! file by the binary). Components receive the pieces they need through
//! [`AppConfig`]; nothing below this module reads the environment itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::config::ServerConfig;
use crate::error::{EtymologyError, Result};

/// Env vars checked for the Gemini key, in priority order.
pub const GEMINI_KEY_VARS: [&str; 3] = [
    "GOOGLE_GENERATIVE_AI_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
];

/// Model used when `ETYMOLOGY_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Default generation budget in seconds.
pub const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;

/// Gemini REST API v1beta base.
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Generation service settings.
#[derive(Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Upstash Redis REST credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstashConfig {
    pub url: String,
    pub token: String,
}

impl std::fmt::Debug for UpstashConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstashConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Which rate-limit backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackendKind {
    /// Upstash when credentials are present, otherwise disabled (default).
    #[default]
    Upstash,
    /// In-process sliding window, regardless of credentials.
    Memory,
}

/// Sliding-window policy and backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackendKind,
    pub upstash: Option<UpstashConfig>,
    /// Admissions allowed per identifier per window.
    pub max_requests: u32,
    pub window: Duration,
    /// Record analytics events on the backend.
    pub analytics: bool,
    /// Key prefix shared with other Upstash ratelimit clients.
    pub prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackendKind::Upstash,
            upstash: None,
            max_requests: 10,
            window: Duration::from_secs(60),
            analytics: true,
            prefix: "@upstash/ratelimit".to_string(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    pub rate_limit: RateLimitConfig,
    /// Postgres URL for the result cache. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub server: ServerConfig,
    pub generation_timeout: Duration,
}

impl AppConfig {
    /// Build from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = GEMINI_KEY_VARS
            .iter()
            .find_map(|&var| get(var))
            .ok_or_else(|| {
                EtymologyError::Config("GOOGLE_GENERATIVE_AI_API_KEY is not set".to_string())
            })?;

        let gemini = GeminiConfig {
            api_key,
            model: get("ETYMOLOGY_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: get("GEMINI_API_BASE")
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
        };

        let backend = match get("RATE_LIMIT_BACKEND").as_deref() {
            None | Some("upstash") => RateLimitBackendKind::Upstash,
            Some("memory") => RateLimitBackendKind::Memory,
            Some(other) => {
                return Err(EtymologyError::Config(format!(
                    "RATE_LIMIT_BACKEND must be 'upstash' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let upstash = match (get("UPSTASH_REDIS_REST_URL"), get("UPSTASH_REDIS_REST_TOKEN")) {
            (Some(url), Some(token)) => Some(UpstashConfig { url, token }),
            _ => None,
        };

        let generation_timeout = match get("ETYMOLOGY_GENERATION_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| {
                    EtymologyError::Config(format!(
                        "ETYMOLOGY_GENERATION_TIMEOUT_SECS must be a positive integer, got '{}'",
                        raw
                    ))
                })?;
                Duration::from_secs(secs.max(1))
            }
            None => Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
        };

        let mut server = ServerConfig::default();
        if let Some(bind) = get("ETYMOLOGY_BIND") {
            server.bind = bind;
        }

        Ok(Self {
            gemini,
            rate_limit: RateLimitConfig {
                backend,
                upstash,
                ..RateLimitConfig::default()
            },
            database_url: get("DATABASE_URL"),
            server,
            generation_timeout,
        })
    }
}
