//! Usage counter route.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::api::server::AppState;

/// GET /metrics: request counters plus the number of cached entries.
///
/// `cached_entries` is `null` when the cache store cannot be counted.
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.metrics.snapshot();
    let cached_entries = match state.cache.count().await {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(error = %e, "Failed to count cached entries");
            None
        }
    };

    Json(json!({
        "requests": snapshot.requests,
        "cache_hits": snapshot.cache_hits,
        "cache_misses": snapshot.cache_misses,
        "rate_limited": snapshot.rate_limited,
        "generation_failures": snapshot.generation_failures,
        "cache_write_failures": snapshot.cache_write_failures,
        "cached_entries": cached_entries,
        "uptime_secs": snapshot.uptime_secs,
    }))
}
