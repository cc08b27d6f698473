//! `POST /etymology`: cached or streamed etymology explanations.
//!
//! Flow per request: rate limit, cache lookup, then on a miss a streamed
//! generation. The generation is driven by a detached task that feeds the
//! response body through a channel, so a client disconnect only turns body
//! writes into no-ops; the generation still runs to completion and a valid
//! result is still cached.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::api::middleware::client_identifier;
use crate::api::server::{AppState, X_CACHE};
use crate::cache::{CacheKey, CacheStore};
use crate::error::EtymologyError;
use crate::etymology::{effective_era, EtymologyRequest, EtymologyResult};
use crate::health::UsageMetrics;
use crate::providers::{GenerationEvent, GenerationStream};

const GENERATION_ERROR_BODY: &str = "Error generating etymology";

type BodyChunk = std::result::Result<Bytes, std::io::Error>;

pub async fn post_etymology(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<EtymologyRequest>,
) -> Response {
    let span = info_span!(
        "etymology",
        request_id = %Uuid::new_v4(),
        word = %request.word.trim(),
        era = %effective_era(&request.era),
    );
    handle(state, headers, request).instrument(span).await
}

async fn handle(state: Arc<AppState>, headers: HeaderMap, request: EtymologyRequest) -> Response {
    let identifier = client_identifier(&headers);
    let decision = state.rate_limiter.check_rate_limit(&identifier).await;
    if !decision.success {
        state.metrics.record_rate_limited();
        info!(identifier = %identifier, reset = decision.reset, "Rate limit exceeded");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    let word = request.word.trim();
    if word.is_empty() {
        return (StatusCode::BAD_REQUEST, "A word is required").into_response();
    }
    let era = effective_era(&request.era);
    state.metrics.record_request();

    let key = CacheKey::new(word, era);
    match state.cache.lookup(&key).await {
        Ok(Some(cached)) => {
            state.metrics.record_cache_hit();
            info!(key = %key, "Serving cached etymology");
            return ([(X_CACHE, "HIT")], Json(cached)).into_response();
        }
        Ok(None) => debug!(key = %key, "Cache miss"),
        Err(e) => warn!(key = %key, error = %e, "Cache lookup failed, generating instead"),
    }
    state.metrics.record_cache_miss();

    let mut stream = match state.generator.generate(word, era).await {
        Ok(stream) => stream,
        Err(e) => return generation_failed(&state.metrics, &e),
    };

    // Nothing has been sent yet, so a failure here can still be a clean 500.
    let first = match stream.next().await {
        Some(Ok(event)) => event,
        Some(Err(e)) => return generation_failed(&state.metrics, &e),
        None => {
            let e = EtymologyError::Provider("generation produced no events".into());
            return generation_failed(&state.metrics, &e);
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<BodyChunk>();
    tokio::spawn(
        drive_generation(
            first,
            stream,
            tx,
            state.cache.clone(),
            key,
            state.metrics.clone(),
        )
        .instrument(Span::current()),
    );

    let body = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (X_CACHE, "MISS"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}

fn generation_failed(metrics: &UsageMetrics, error: &EtymologyError) -> Response {
    metrics.record_generation_failure();
    warn!(error = %error, "Etymology generation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        GENERATION_ERROR_BODY,
    )
        .into_response()
}

/// Forward generation events to the response body until the stream ends.
///
/// Send errors mean the client went away and are ignored. An error event
/// aborts the body; a `Complete` event triggers the cache write.
async fn drive_generation(
    first: GenerationEvent,
    mut stream: GenerationStream,
    tx: mpsc::UnboundedSender<BodyChunk>,
    cache: Arc<dyn CacheStore>,
    key: CacheKey,
    metrics: Arc<UsageMetrics>,
) {
    let mut next = Some(Ok(first));
    loop {
        let event = match next.take() {
            Some(event) => event,
            None => match stream.next().await {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            Ok(GenerationEvent::Partial { delta, .. }) => {
                let _ = tx.send(Ok(Bytes::from(delta)));
            }
            Ok(GenerationEvent::Complete(result)) => {
                info!(key = %key, "Etymology generated");
                tokio::spawn(
                    cache_result(cache, key, result, metrics).instrument(Span::current()),
                );
                return;
            }
            Err(e) => {
                metrics.record_generation_failure();
                warn!(error = %e, "Etymology generation failed mid-stream");
                let _ = tx.send(Err(std::io::Error::other(e.to_string())));
                return;
            }
        }
    }
    // Providers always end with Complete or an error; treat anything else as a failure.
    metrics.record_generation_failure();
    warn!("Generation stream ended without a result");
    let _ = tx.send(Err(std::io::Error::other("generation ended without a result")));
}

async fn cache_result(
    cache: Arc<dyn CacheStore>,
    key: CacheKey,
    result: EtymologyResult,
    metrics: Arc<UsageMetrics>,
) {
    match cache.upsert(&key, &result).await {
        Ok(()) => debug!(key = %key, "Cached etymology"),
        Err(e) => {
            metrics.record_cache_write_failure();
            warn!(key = %key, error = %e, "Failed to cache etymology");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::ServerConfig;
    use crate::api::server::build_router;
    use crate::cache::{MemoryCacheStore, MockCacheStore};
    use crate::etymology::schema::fixtures::gay_victorian;
    use crate::providers::testing::ScriptedGenerator;
    use crate::providers::EtymologyGenerator;
    use crate::ratelimit::{RateLimiter, SlidingWindowLimiter};
    use axum::http::Request;
    use axum::Router;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn app_with(
        limiter: RateLimiter,
        cache: Arc<dyn CacheStore>,
        generator: Arc<dyn EtymologyGenerator>,
    ) -> (Router, Arc<UsageMetrics>) {
        let state = AppState::new(limiter, cache, generator);
        let metrics = state.metrics.clone();
        (build_router(state, &ServerConfig::default()), metrics)
    }

    fn post(body: &str) -> Request<Body> {
        Request::post("/etymology")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const GAY_VICTORIAN: &str = r#"{"word":"gay","era":"Victorian Era"}"#;

    async fn body_text(response: Response) -> std::result::Result<String, axum::Error> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(String::from_utf8(bytes.to_vec()).unwrap())
    }

    async fn wait_for_entry(cache: &MemoryCacheStore, key: &CacheKey) -> Option<EtymologyResult> {
        for _ in 0..100 {
            if let Some(found) = cache.lookup(key).await.unwrap() {
                return Some(found);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_miss_streams_then_hit_serves_cached_copy() {
        let cache = Arc::new(MemoryCacheStore::new());
        let generator = Arc::new(ScriptedGenerator::for_result(&gay_victorian(), 6));
        let (app, metrics) = app_with(RateLimiter::disabled(), cache.clone(), generator.clone());

        let first = app.clone().oneshot(post(GAY_VICTORIAN)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-cache"], "MISS");
        assert_eq!(
            first.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
        let streamed = body_text(first).await.unwrap();
        let streamed: EtymologyResult = serde_json::from_str(&streamed).unwrap();
        assert_eq!(streamed, gay_victorian());

        let key = CacheKey::new("gay", "Victorian Era");
        assert_eq!(wait_for_entry(&cache, &key).await, Some(gay_victorian()));

        let second = app
            .oneshot(post(r#"{"word":"  Gay ","era":"victorian era"}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()["x-cache"], "HIT");
        let cached: EtymologyResult =
            serde_json::from_str(&body_text(second).await.unwrap()).unwrap();
        assert_eq!(cached, streamed);

        assert_eq!(generator.calls(), 1);
        let s = metrics.snapshot();
        assert_eq!((s.requests, s.cache_hits, s.cache_misses), (2, 1, 1));
    }

    #[tokio::test]
    async fn test_eleventh_request_is_rate_limited() {
        let limiter = RateLimiter::with_backend(Arc::new(SlidingWindowLimiter::new(
            10,
            Duration::from_secs(60),
        )));
        let cache = Arc::new(MemoryCacheStore::new());
        cache
            .upsert(&CacheKey::new("gay", "Victorian Era"), &gay_victorian())
            .await
            .unwrap();
        let generator = Arc::new(ScriptedGenerator::for_result(&gay_victorian(), 2));
        let (app, metrics) = app_with(limiter, cache, generator.clone());

        for _ in 0..10 {
            let response = app.clone().oneshot(post(GAY_VICTORIAN)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let denied = app.oneshot(post(GAY_VICTORIAN)).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(body_text(denied).await.unwrap().is_empty());
        assert_eq!(metrics.snapshot().rate_limited, 1);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_limiter_admits_eleven_requests() {
        let cache = Arc::new(MemoryCacheStore::new());
        cache
            .upsert(&CacheKey::new("gay", "Victorian Era"), &gay_victorian())
            .await
            .unwrap();
        let generator = Arc::new(ScriptedGenerator::for_result(&gay_victorian(), 2));
        let (app, _) = app_with(RateLimiter::disabled(), cache, generator);
        for _ in 0..11 {
            let response = app.clone().oneshot(post(GAY_VICTORIAN)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_invalid_output_is_not_cached() {
        let cache = Arc::new(MemoryCacheStore::new());
        let generator = Arc::new(ScriptedGenerator::from_text(
            r#"{"word":"gay","meaning":"merry"}"#,
            4,
        ));
        let (app, metrics) = app_with(RateLimiter::disabled(), cache.clone(), generator);

        let response = app.oneshot(post(GAY_VICTORIAN)).await.unwrap();
        // Partial output was already sent, so the failure aborts the body.
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.is_empty());
        assert_eq!(metrics.snapshot().generation_failures, 1);
    }

    #[tokio::test]
    async fn test_failure_before_first_chunk_is_500() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (app, metrics) = app_with(
            RateLimiter::disabled(),
            cache.clone(),
            Arc::new(ScriptedGenerator::failing()),
        );
        let response = app.oneshot(post(GAY_VICTORIAN)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await.unwrap(), GENERATION_ERROR_BODY);
        assert!(cache.is_empty());
        assert_eq!(metrics.snapshot().generation_failures, 1);
    }

    #[tokio::test]
    async fn test_empty_output_is_500() {
        let (app, _) = app_with(
            RateLimiter::disabled(),
            Arc::new(MemoryCacheStore::new()),
            Arc::new(ScriptedGenerator::from_text("", 1)),
        );
        let response = app.oneshot(post(GAY_VICTORIAN)).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_store_errors_degrade_to_miss() {
        let mut cache = MockCacheStore::new();
        cache
            .expect_lookup()
            .times(1)
            .returning(|_| Err(EtymologyError::Cache("connection refused".into())));
        cache
            .expect_upsert()
            .times(1)
            .returning(|_, _| Err(EtymologyError::Cache("connection refused".into())));
        let generator = Arc::new(ScriptedGenerator::for_result(&gay_victorian(), 3));
        let (app, metrics) = app_with(RateLimiter::disabled(), Arc::new(cache), generator.clone());

        let response = app.oneshot(post(GAY_VICTORIAN)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache"], "MISS");
        let text = body_text(response).await.unwrap();
        assert_eq!(
            serde_json::from_str::<EtymologyResult>(&text).unwrap(),
            gay_victorian()
        );

        for _ in 0..100 {
            if metrics.snapshot().cache_write_failures == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(metrics.snapshot().cache_write_failures, 1);
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_word_is_400() {
        let generator = Arc::new(ScriptedGenerator::for_result(&gay_victorian(), 2));
        let (app, _) = app_with(
            RateLimiter::disabled(),
            Arc::new(MemoryCacheStore::new()),
            generator.clone(),
        );
        let response = app
            .clone()
            .oneshot(post(r#"{"word":"   ","era":"Medieval"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(post(r#"{"era":"Medieval"}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let (app, _) = app_with(
            RateLimiter::disabled(),
            Arc::new(MemoryCacheStore::new()),
            Arc::new(ScriptedGenerator::for_result(&gay_victorian(), 2)),
        );
        let response = app.oneshot(post(r#"{"word": "gay""#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_api_prefixed_route_and_default_era() {
        let cache = Arc::new(MemoryCacheStore::new());
        let (app, _) = app_with(
            RateLimiter::disabled(),
            cache.clone(),
            Arc::new(ScriptedGenerator::for_result(&gay_victorian(), 2)),
        );
        let request = Request::post("/api/etymology")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"word":"gay","era":""}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_text(response).await.unwrap();

        let key = CacheKey::new("gay", "Modern Day");
        assert!(wait_for_entry(&cache, &key).await.is_some());
    }

    #[tokio::test]
    async fn test_generation_continues_after_client_disconnect() {
        let cache = Arc::new(MemoryCacheStore::new());
        let generator = Arc::new(
            ScriptedGenerator::for_result(&gay_victorian(), 5)
                .with_delay(Duration::from_millis(5), Duration::from_secs(10)),
        );
        let (app, _) = app_with(RateLimiter::disabled(), cache.clone(), generator);

        let response = app.oneshot(post(GAY_VICTORIAN)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        drop(response);

        let key = CacheKey::new("gay", "Victorian Era");
        assert_eq!(wait_for_entry(&cache, &key).await, Some(gay_victorian()));
    }
}
