//! Client-side lookup state machine.
//!
//! ```text
//! Idle ──submit──▶ Streaming ──finish(valid)──▶ Complete
//!                      │
//!                      └──fail / finish(invalid)──▶ Error
//! ```
//!
//! `Complete` and `Error` accept a new `submit`. While streaming, `current`
//! holds the best decoding of the text received so far.

use serde_json::Value;

use crate::etymology::{EtymologyRequest, EtymologyResult, CLIENT_DEFAULT_ERA};
use crate::utils::parse_partial_json;

/// Message shown when the server rate-limits the client.
pub const TOO_MANY_REQUESTS_MESSAGE: &str = "Too many requests. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Complete,
    Error(String),
}

/// Value of the `X-Cache` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HIT" => Some(Self::Hit),
            "MISS" => Some(Self::Miss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSession {
    word: String,
    era: String,
    state: SessionState,
    text: String,
    current: Option<Value>,
    result: Option<EtymologyResult>,
    cache_status: Option<CacheStatus>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self {
            word: String::new(),
            era: CLIENT_DEFAULT_ERA.to_string(),
            state: SessionState::Idle,
            text: String::new(),
            current: None,
            result: None,
            cache_status: None,
        }
    }

    pub fn set_word(&mut self, word: impl Into<String>) {
        self.word = word.into();
    }

    pub fn set_era(&mut self, era: impl Into<String>) {
        self.era = era.into();
    }

    pub fn word(&self) -> &str {
        &self.word
    }

    pub fn era(&self) -> &str {
        &self.era
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    /// Best decoding of the response so far.
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    /// The validated result, once `Complete`.
    pub fn result(&self) -> Option<&EtymologyResult> {
        self.result.as_ref()
    }

    pub fn cache_status(&self) -> Option<CacheStatus> {
        self.cache_status
    }

    /// Start a lookup for the current word and era.
    ///
    /// Returns `None` (and leaves the state alone) when the word is blank or
    /// a lookup is already streaming.
    pub fn submit(&mut self) -> Option<EtymologyRequest> {
        let word = self.word.trim();
        if word.is_empty() || self.is_streaming() {
            return None;
        }
        let request = EtymologyRequest::new(word, self.era.clone());
        self.state = SessionState::Streaming;
        self.text.clear();
        self.current = None;
        self.result = None;
        self.cache_status = None;
        Some(request)
    }

    /// Record the response's cache header.
    pub fn set_cache_status(&mut self, status: Option<CacheStatus>) {
        self.cache_status = status;
    }

    /// Append body text and re-decode. Ignored unless streaming.
    pub fn push_chunk(&mut self, chunk: &str) -> Option<&Value> {
        if !self.is_streaming() {
            return None;
        }
        self.text.push_str(chunk);
        if let Some(value) = parse_partial_json(&self.text) {
            self.current = Some(value);
        }
        self.current.as_ref()
    }

    /// End of body: the accumulated text must be a valid result.
    pub fn finish(&mut self) -> &SessionState {
        if !self.is_streaming() {
            return &self.state;
        }
        match EtymologyResult::from_json_str(&self.text) {
            Ok(result) => {
                self.current = serde_json::to_value(&result).ok();
                self.result = Some(result);
                self.state = SessionState::Complete;
            }
            Err(e) => self.state = SessionState::Error(e.to_string()),
        }
        &self.state
    }

    /// Non-2xx response.
    pub fn fail_with_status(&mut self, status: u16, body: &str) {
        let message = if status == 429 {
            TOO_MANY_REQUESTS_MESSAGE.to_string()
        } else if body.trim().is_empty() {
            format!("Request failed with status {}", status)
        } else {
            body.trim().to_string()
        };
        self.fail(message);
    }

    /// Transport failure or interrupted body.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = SessionState::Error(message.into());
    }
}
