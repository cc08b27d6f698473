//! `etymology serve`: wire the components together and run the server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use etymology_explainer::api::{start_server, AppState};
use etymology_explainer::cache::{CacheStore, MemoryCacheStore, PgCacheStore};
use etymology_explainer::config::AppConfig;
use etymology_explainer::health::start_periodic_usage_flush;
use etymology_explainer::providers::GeminiGenerator;
use etymology_explainer::ratelimit::RateLimiter;

pub(crate) async fn cmd_serve(bind: Option<String>) -> Result<()> {
    let mut config = AppConfig::from_env().context("Invalid configuration")?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }

    // Shared by Gemini and Upstash calls. No overall timeout: generations
    // stream for a while and carry their own deadline.
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let rate_limiter = RateLimiter::from_config(&config.rate_limit, http.clone());
    if !rate_limiter.is_enabled() {
        warn!("Rate limiting is disabled (missing UPSTASH environment variables)");
    }

    let cache = build_cache(&config).await?;
    let generator = GeminiGenerator::new(&config.gemini, config.generation_timeout, http);

    info!(
        model = generator.model(),
        cache = cache.name(),
        rate_limiter = ?rate_limiter,
        timeout_secs = config.generation_timeout.as_secs(),
        "Starting etymology server"
    );

    let state = AppState::new(rate_limiter, cache, Arc::new(generator));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let flush = start_periodic_usage_flush(state.metrics.clone(), shutdown_rx);

    start_server(&config.server, state, shutdown_signal())
        .await
        .with_context(|| format!("Server on {} failed", config.server.bind))?;

    let _ = shutdown_tx.send(true);
    let _ = flush.await;
    Ok(())
}

async fn build_cache(config: &AppConfig) -> Result<Arc<dyn CacheStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgCacheStore::connect_lazy(url).context("Invalid DATABASE_URL")?;
            if let Err(e) = store.migrate().await {
                warn!(error = %e, "Could not prepare the cache table; lookups will miss until the database is reachable");
            }
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL is not set, caching results in memory only");
            Ok(Arc::new(MemoryCacheStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
