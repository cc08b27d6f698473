//! Gemini structured-output provider.
//!
//! Calls `streamGenerateContent?alt=sse` with a JSON response schema and
//! feeds the streamed text through [`structured_stream`].
//!
//! Thinking models return parts tagged `thought: true`. Those are reasoning
//! steps, not part of the JSON document, and are dropped.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::config::GeminiConfig;
use crate::error::{EtymologyError, Result};
use crate::etymology::{build_prompt, response_schema};

use super::{structured_stream, EtymologyGenerator, GenerationStream};

/// Finish reasons that mean the output is usable.
const NORMAL_FINISH: [&str; 2] = ["STOP", "FINISH_REASON_UNSPECIFIED"];

/// Gemini generator with a fixed model and an overall time budget per call.
pub struct GeminiGenerator {
    api_key: String,
    model: String,
    api_base: String,
    timeout: Duration,
    client: Client,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GeminiGenerator {
    pub fn new(config: &GeminiConfig, timeout: Duration, client: Client) -> Self {
        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout,
            client,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the `streamGenerateContent` request body.
    pub fn build_request_body(word: &str, era: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": build_prompt(word, era) }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema()
            }
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent",
            self.api_base, self.model
        )
    }

    /// Non-thought text of one streamed chunk.
    pub fn extract_text(chunk: &Value) -> Option<String> {
        let parts = chunk["candidates"][0]["content"]["parts"].as_array()?;
        let text: String = parts
            .iter()
            .filter(|p| !p["thought"].as_bool().unwrap_or(false))
            .filter_map(|p| p["text"].as_str())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Interpret one SSE `data:` payload.
    ///
    /// `Ok(None)` means the chunk carried nothing to forward (metadata only,
    /// or only thoughts).
    fn parse_stream_chunk(payload: &str) -> Result<Option<String>> {
        let chunk: Value = serde_json::from_str(payload)
            .map_err(|e| EtymologyError::Provider(format!("Malformed Gemini chunk: {}", e)))?;

        if let Some(message) = chunk["error"]["message"].as_str() {
            return Err(EtymologyError::Provider(format!("Gemini API error: {}", message)));
        }
        if let Some(reason) = chunk["promptFeedback"]["blockReason"].as_str() {
            return Err(EtymologyError::Provider(format!("Prompt blocked: {}", reason)));
        }

        let text = Self::extract_text(&chunk);
        if let Some(reason) = chunk["candidates"][0]["finishReason"].as_str() {
            if !NORMAL_FINISH.contains(&reason) {
                return Err(EtymologyError::Provider(format!(
                    "Gemini stopped generating: {}",
                    reason
                )));
            }
        }
        Ok(text)
    }

    /// Names of the models in a `models.list` response that support `generateContent`.
    pub fn generate_content_models(listing: &Value) -> Vec<String> {
        listing["models"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|m| {
                m["supportedGenerationMethods"]
                    .as_array()
                    .is_some_and(|methods| methods.iter().any(|v| v == "generateContent"))
            })
            .filter_map(|m| m["name"].as_str().map(String::from))
            .collect()
    }

    /// List the models this API key can generate content with.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/models", self.api_base))
            .query(&[("key", self.api_key.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| EtymologyError::Provider(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(EtymologyError::Provider(Self::error_message(
                status.as_u16(),
                &text,
            )));
        }
        let listing: Value = serde_json::from_str(&text)?;
        Ok(Self::generate_content_models(&listing))
    }

    /// Readable message from a non-2xx Gemini response body.
    fn error_message(status: u16, body: &str) -> String {
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .map(|m| format!("Gemini API error ({}): {}", status, m))
            .unwrap_or_else(|| format!("Gemini API error ({}): {}", status, body))
    }
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Buffers raw bytes so multi-byte characters split across network chunks
/// decode correctly. Yields the joined `data:` lines of each complete event.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            self.line(line, &mut events);
        }
        events
    }

    fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let rest = String::from_utf8_lossy(&rest);
            self.line(rest.trim_end_matches('\r'), &mut events);
        }
        self.line("", &mut events);
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(self.data.join("\n"));
                self.data.clear();
            }
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
}

struct DeltaState<B> {
    bytes: std::pin::Pin<Box<B>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Text deltas from a streaming Gemini response.
fn text_deltas(response: reqwest::Response) -> impl Stream<Item = Result<String>> + Send + 'static {
    let state = DeltaState {
        bytes: Box::pin(response.bytes_stream()),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.pending.pop_front() {
                match GeminiGenerator::parse_stream_chunk(&payload) {
                    Ok(Some(text)) => return Some((Ok(text), st)),
                    Ok(None) => continue,
                    Err(e) => {
                        st.pending.clear();
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(&chunk);
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.done = true;
                    let err = EtymologyError::Provider(format!("Gemini stream interrupted: {}", e));
                    return Some((Err(err), st));
                }
                None => {
                    let events = st.decoder.finish();
                    st.pending.extend(events);
                    st.done = true;
                }
            }
        }
    })
}

#[async_trait]
impl EtymologyGenerator for GeminiGenerator {
    async fn generate(&self, word: &str, era: &str) -> Result<GenerationStream> {
        let deadline = Instant::now() + self.timeout;
        let body = Self::build_request_body(word, era);

        debug!(model = %self.model, word, era, "Gemini streaming request");

        let request = self
            .client
            .post(self.api_url())
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .header("Content-Type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout_at(deadline, request)
            .await
            .map_err(|_| EtymologyError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| EtymologyError::Provider(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EtymologyError::Provider(Self::error_message(
                status.as_u16(),
                &text,
            )));
        }

        Ok(structured_stream(
            text_deltas(response),
            deadline,
            self.timeout,
        ))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etymology::schema::fixtures::gay_victorian;
    use crate::providers::GenerationEvent;
    use axum::extract::{Query, State};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::{routing::post, Json, Router};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn generator_for(api_base: &str, timeout: Duration) -> GeminiGenerator {
        GeminiGenerator::new(
            &GeminiConfig {
                api_key: "test-key".into(),
                model: "gemini-2.5-flash".into(),
                api_base: api_base.into(),
            },
            timeout,
            Client::new(),
        )
    }

    fn sse_body(chunks: &[Value]) -> String {
        chunks
            .iter()
            .map(|c| format!("data: {}\r\n\r\n", c))
            .collect()
    }

    fn text_chunk(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
    }

    #[derive(Clone)]
    struct FakeGemini {
        status: StatusCode,
        body: String,
        delay: Duration,
        seen: Arc<Mutex<Vec<(HashMap<String, String>, Value)>>>,
    }

    async fn fake_handler(
        State(fake): State<FakeGemini>,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        fake.seen.lock().unwrap().push((query, body));
        if !fake.delay.is_zero() {
            tokio::time::sleep(fake.delay).await;
        }
        (
            fake.status,
            [(header::CONTENT_TYPE, "text/event-stream")],
            fake.body.clone(),
        )
    }

    async fn spawn_fake(fake: FakeGemini) -> String {
        let app = Router::new()
            .route(
                "/models/gemini-2.5-flash:streamGenerateContent",
                post(fake_handler),
            )
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fake(status: StatusCode, body: String) -> FakeGemini {
        FakeGemini {
            status,
            body,
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[test]
    fn test_request_body_carries_prompt_and_schema() {
        let body = GeminiGenerator::build_request_body("gay", "Victorian Era");
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("\"gay\""));
        assert!(prompt.contains("Victorian Era"));
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["responseSchema"], response_schema());
    }

    #[test]
    fn test_api_url_strips_trailing_slash() {
        let generator = generator_for("https://example.test/v1beta/", Duration::from_secs(1));
        assert_eq!(
            generator.api_url(),
            "https://example.test/v1beta/models/gemini-2.5-flash:streamGenerateContent"
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let generator = generator_for("https://example.test", Duration::from_secs(1));
        let debug = format!("{:?}", generator);
        assert!(!debug.contains("test-key"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_extract_text_skips_thought_parts() {
        let chunk = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "considering the word...", "thought": true },
                        { "text": "{\"word\":" },
                        { "text": "\"gay\"" }
                    ]
                }
            }]
        });
        assert_eq!(
            GeminiGenerator::extract_text(&chunk).as_deref(),
            Some("{\"word\":\"gay\"")
        );
    }

    #[test]
    fn test_generate_content_models_filters_by_method() {
        let listing = json!({
            "models": [
                { "name": "models/gemini-2.5-flash", "supportedGenerationMethods": ["generateContent", "countTokens"] },
                { "name": "models/text-embedding-004", "supportedGenerationMethods": ["embedContent"] },
                { "name": "models/legacy" }
            ]
        });
        assert_eq!(
            GeminiGenerator::generate_content_models(&listing),
            vec!["models/gemini-2.5-flash".to_string()]
        );
        assert!(GeminiGenerator::generate_content_models(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_list_models_against_fake_server() {
        async fn models(Query(query): Query<HashMap<String, String>>) -> impl IntoResponse {
            if query.get("key").map(String::as_str) != Some("test-key") {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": { "message": "API key not valid" } })),
                );
            }
            (
                StatusCode::OK,
                Json(json!({
                    "models": [{ "name": "models/gemini-2.5-flash", "supportedGenerationMethods": ["generateContent"] }]
                })),
            )
        }
        let app = Router::new().route("/models", axum::routing::get(models));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let base = format!("http://{}", addr);

        let names = generator_for(&base, Duration::from_secs(5))
            .list_models()
            .await
            .unwrap();
        assert_eq!(names, vec!["models/gemini-2.5-flash".to_string()]);

        let mut bad_key = generator_for(&base, Duration::from_secs(5));
        bad_key.api_key = "wrong".into();
        let err = bad_key.list_models().await.unwrap_err();
        assert!(err.to_string().contains("API key not valid"));
    }

    #[test]
    fn test_extract_text_only_thoughts_is_none() {
        let chunk = json!({
            "candidates": [{ "content": { "parts": [{ "text": "hmm", "thought": true }] } }]
        });
        assert!(GeminiGenerator::extract_text(&chunk).is_none());
    }

    #[test]
    fn test_parse_stream_chunk_errors() {
        let blocked = json!({ "promptFeedback": { "blockReason": "SAFETY" } }).to_string();
        assert!(matches!(
            GeminiGenerator::parse_stream_chunk(&blocked),
            Err(EtymologyError::Provider(m)) if m.contains("SAFETY")
        ));

        let stopped = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{" }] }, "finishReason": "MAX_TOKENS" }]
        })
        .to_string();
        assert!(GeminiGenerator::parse_stream_chunk(&stopped).is_err());

        let finished = json!({
            "candidates": [{ "content": { "parts": [{ "text": "}" }] }, "finishReason": "STOP" }]
        })
        .to_string();
        assert_eq!(
            GeminiGenerator::parse_stream_chunk(&finished).unwrap().as_deref(),
            Some("}")
        );

        let usage_only = json!({ "usageMetadata": { "totalTokenCount": 12 } }).to_string();
        assert_eq!(GeminiGenerator::parse_stream_chunk(&usage_only).unwrap(), None);

        assert!(GeminiGenerator::parse_stream_chunk("not json").is_err());
    }

    #[test]
    fn test_error_message_prefers_api_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid"}}"#;
        assert_eq!(
            GeminiGenerator::error_message(400, body),
            "Gemini API error (400): API key not valid"
        );
        assert_eq!(
            GeminiGenerator::error_message(502, "Bad Gateway"),
            "Gemini API error (502): Bad Gateway"
        );
    }

    #[test]
    fn test_sse_decoder_handles_split_events() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert!(decoder.push(b":1}\r\n").is_empty());
        assert_eq!(decoder.push(b"\r\ndata: 2\n\n"), vec!["{\"a\":1}", "2"]);
    }

    #[test]
    fn test_sse_decoder_keeps_multibyte_chars_across_chunks() {
        let mut decoder = SseDecoder::default();
        let event = "data: café\n\n".as_bytes();
        let split = event.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert!(decoder.push(&event[..split]).is_empty());
        assert_eq!(decoder.push(&event[split..]), vec!["café"]);
    }

    #[test]
    fn test_sse_decoder_flushes_unterminated_event() {
        let mut decoder = SseDecoder::default();
        decoder.push(b": keep-alive\n\nevent: message\ndata: tail");
        assert_eq!(decoder.finish(), vec!["tail"]);
    }

    #[tokio::test]
    async fn test_generate_streams_against_fake_gemini() {
        let text = serde_json::to_string(&gay_victorian()).unwrap();
        let (a, b) = text.split_at(text.len() / 2);
        let body = sse_body(&[
            json!({ "candidates": [{ "content": { "parts": [{ "text": "plan", "thought": true }] } }] }),
            text_chunk(a),
            text_chunk(b),
            json!({ "candidates": [{ "content": { "parts": [] }, "finishReason": "STOP" }] }),
        ]);
        let fake = fake(StatusCode::OK, body);
        let seen = fake.seen.clone();
        let base = spawn_fake(fake).await;

        let generator = generator_for(&base, Duration::from_secs(10));
        let events: Vec<_> = generator
            .generate("gay", "Victorian Era")
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        match &events[0] {
            Ok(GenerationEvent::Partial { delta, .. }) => assert_eq!(delta, a),
            other => panic!("unexpected event {:?}", other),
        }
        match &events[2] {
            Ok(GenerationEvent::Complete(result)) => assert_eq!(*result, gay_victorian()),
            other => panic!("unexpected event {:?}", other),
        }

        let seen = seen.lock().unwrap();
        let (query, body) = &seen[0];
        assert_eq!(query.get("alt").map(String::as_str), Some("sse"));
        assert_eq!(query.get("key").map(String::as_str), Some("test-key"));
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[tokio::test]
    async fn test_generate_reports_api_error_status() {
        let base = spawn_fake(fake(
            StatusCode::FORBIDDEN,
            r#"{"error":{"code":403,"message":"Permission denied"}}"#.into(),
        ))
        .await;
        let generator = generator_for(&base, Duration::from_secs(10));
        match generator.generate("gay", "Victorian Era").await {
            Err(EtymologyError::Provider(m)) => assert!(m.contains("Permission denied")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[tokio::test]
    async fn test_generate_times_out_slow_service() {
        let mut slow = fake(StatusCode::OK, sse_body(&[text_chunk("{}")]));
        slow.delay = Duration::from_secs(5);
        let base = spawn_fake(slow).await;
        let generator = generator_for(&base, Duration::from_millis(200));
        match generator.generate("gay", "Victorian Era").await {
            Err(EtymologyError::Timeout(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("expected a timeout"),
        }
    }

    #[tokio::test]
    async fn test_truncated_output_fails_validation() {
        let body = sse_body(&[text_chunk(r#"{"word":"gay","meaning":"#)]);
        let base = spawn_fake(fake(StatusCode::OK, body)).await;
        let generator = generator_for(&base, Duration::from_secs(10));
        let events: Vec<_> = generator
            .generate("gay", "Victorian Era")
            .await
            .unwrap()
            .collect()
            .await;
        assert!(matches!(events.last(), Some(Err(EtymologyError::Validation(_)))));
    }
}
