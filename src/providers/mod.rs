//! Structured generation providers.
//!
//! A provider turns `(word, era)` into a [`GenerationStream`]: a sequence of
//! [`GenerationEvent::Partial`] events, one per text delta from the model,
//! ending in exactly one [`GenerationEvent::Complete`] carrying the validated
//! result, or in an error. A stream that ended in an error never yields
//! `Complete`.

pub mod gemini;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::{EtymologyError, Result};
use crate::etymology::EtymologyResult;
use crate::utils::parse_partial_json;

pub use gemini::GeminiGenerator;

/// One step of a structured generation.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// New raw text from the model plus the best decoding of everything so far.
    Partial {
        delta: String,
        partial: Option<Value>,
    },
    /// The full output, parsed and validated.
    Complete(EtymologyResult),
}

/// Boxed stream of generation events.
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent>> + Send>>;

/// A service that generates etymology explanations.
#[async_trait]
pub trait EtymologyGenerator: Send + Sync {
    /// Start generating for `(word, era)`. Errors returned here happen before
    /// any output exists (bad credentials, unreachable service).
    async fn generate(&self, word: &str, era: &str) -> Result<GenerationStream>;

    /// Short provider name for logs.
    fn name(&self) -> &str;
}

/// Accumulates streamed JSON text and decodes it.
#[derive(Debug, Default)]
pub struct ObjectAccumulator {
    text: String,
}

impl ObjectAccumulator {
    pub fn push(&mut self, delta: &str) -> Option<Value> {
        self.text.push_str(delta);
        parse_partial_json(&self.text)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parse and validate the accumulated text as a complete result.
    pub fn finish(&self) -> Result<EtymologyResult> {
        if self.text.trim().is_empty() {
            return Err(EtymologyError::Validation("model returned no output".into()));
        }
        EtymologyResult::from_json_str(&self.text)
    }
}

struct StructuredState<S> {
    deltas: Pin<Box<S>>,
    acc: ObjectAccumulator,
    finished: bool,
}

/// Turn a stream of raw text deltas into a [`GenerationStream`].
///
/// Empty deltas are skipped. The whole stream must end before `deadline`;
/// otherwise it ends with [`EtymologyError::Timeout`].
pub fn structured_stream<S>(deltas: S, deadline: Instant, budget: Duration) -> GenerationStream
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    let state = StructuredState {
        deltas: Box::pin(deltas),
        acc: ObjectAccumulator::default(),
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, move |mut st| async move {
        if st.finished {
            return None;
        }
        loop {
            match tokio::time::timeout_at(deadline, st.deltas.next()).await {
                Err(_) => {
                    st.finished = true;
                    return Some((Err(EtymologyError::Timeout(budget.as_secs())), st));
                }
                Ok(Some(Err(e))) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                Ok(Some(Ok(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    let partial = st.acc.push(&delta);
                    return Some((Ok(GenerationEvent::Partial { delta, partial }), st));
                }
                Ok(None) => {
                    st.finished = true;
                    let outcome = st.acc.finish().map(GenerationEvent::Complete);
                    return Some((outcome, st));
                }
            }
        }
    }))
}
