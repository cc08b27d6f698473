//! Axum API server for the etymology service.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::config::ServerConfig;
use crate::cache::CacheStore;
use crate::health::UsageMetrics;
use crate::providers::EtymologyGenerator;
use crate::ratelimit::RateLimiter;

/// Response header naming the cache outcome (`HIT` or `MISS`).
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub rate_limiter: RateLimiter,
    pub cache: Arc<dyn CacheStore>,
    pub generator: Arc<dyn EtymologyGenerator>,
    /// Lock-free usage counters.
    pub metrics: Arc<UsageMetrics>,
}

impl AppState {
    pub fn new(
        rate_limiter: RateLimiter,
        cache: Arc<dyn CacheStore>,
        generator: Arc<dyn EtymologyGenerator>,
    ) -> Self {
        Self {
            rate_limiter,
            cache,
            generator,
            metrics: Arc::new(UsageMetrics::new()),
        }
    }
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let shared_state = Arc::new(state);

    // Browsers must be able to read X-Cache from cross-origin responses.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .expose_headers([X_CACHE]);

    Router::new()
        .route("/etymology", post(super::routes::etymology::post_etymology))
        .route("/api/etymology", post(super::routes::etymology::post_etymology))
        .route("/preview-image", get(super::routes::preview::get_preview_image))
        .route("/api/og", get(super::routes::preview::get_preview_image))
        .route("/health", get(super::routes::health::get_health))
        .route("/metrics", get(super::routes::metrics::get_metrics))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Bind `config.bind` and serve until `shutdown` resolves.
pub async fn start_server<F>(
    config: &ServerConfig,
    state: AppState,
    shutdown: F,
) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = build_router(state, config);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!("Etymology server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
