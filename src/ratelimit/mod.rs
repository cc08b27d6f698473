//! Per-client rate limiting.
//!
//! [`RateLimiter`] wraps an optional [`RateLimitBackend`]. Without a backend
//! every check is admitted and a warning is logged, which is the intended
//! development mode when no Upstash credentials are configured.
//!
//! Backend failures fail open: a limiter outage must not take the service
//! down with it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use etymology_explainer::ratelimit::{RateLimiter, SlidingWindowLimiter};
//!
//! # tokio_test_block_on(async {
//! let limiter = RateLimiter::with_backend(Arc::new(SlidingWindowLimiter::new(
//!     10,
//!     Duration::from_secs(60),
//! )));
//! let decision = limiter.check_rate_limit("203.0.113.7").await;
//! assert!(decision.success);
//! assert_eq!(decision.remaining, 9);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod memory;
pub mod upstash;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{RateLimitBackendKind, RateLimitConfig};
use crate::error::Result;

pub use memory::SlidingWindowLimiter;
pub use upstash::UpstashLimiter;

/// Outcome of a single rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub success: bool,
    /// Admissions allowed per window (0 when limiting is disabled).
    pub limit: u32,
    /// Admissions left in the current window.
    pub remaining: u32,
    /// Unix timestamp (ms) at which the window resets; 0 when unknown.
    pub reset: u64,
}

impl RateLimitDecision {
    /// Decision returned when no backend is configured or the backend failed.
    pub fn allow_unlimited() -> Self {
        Self {
            success: true,
            limit: 0,
            remaining: 0,
            reset: 0,
        }
    }
}

/// A sliding-window limiter keyed by client identifier.
#[async_trait]
pub trait RateLimitBackend: Send + Sync {
    /// Record one attempt for `identifier` and decide whether it is admitted.
    async fn limit(&self, identifier: &str) -> Result<RateLimitDecision>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}

/// Front door used by the request handler.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Option<Arc<dyn RateLimitBackend>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .finish()
    }
}

impl RateLimiter {
    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Arc<dyn RateLimitBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Pick the backend described by `config`.
    ///
    /// `Upstash` without credentials yields a disabled limiter.
    pub fn from_config(config: &RateLimitConfig, client: reqwest::Client) -> Self {
        match config.backend {
            RateLimitBackendKind::Memory => Self::with_backend(Arc::new(
                SlidingWindowLimiter::new(config.max_requests, config.window),
            )),
            RateLimitBackendKind::Upstash => match &config.upstash {
                Some(creds) => Self::with_backend(Arc::new(UpstashLimiter::new(
                    client,
                    creds.clone(),
                    config,
                ))),
                None => Self::disabled(),
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Check whether `identifier` may make another request.
    pub async fn check_rate_limit(&self, identifier: &str) -> RateLimitDecision {
        let Some(backend) = &self.backend else {
            warn!("Rate limiting is disabled (missing UPSTASH environment variables)");
            return RateLimitDecision::allow_unlimited();
        };

        match backend.limit(identifier).await {
            Ok(decision) => {
                debug!(
                    backend = backend.name(),
                    identifier = identifier,
                    success = decision.success,
                    remaining = decision.remaining,
                    "Rate limit checked"
                );
                decision
            }
            Err(e) => {
                warn!(
                    backend = backend.name(),
                    error = %e,
                    "Rate limiter unavailable, admitting request"
                );
                RateLimitDecision::allow_unlimited()
            }
        }
    }
}
