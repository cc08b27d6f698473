//! HTTP client for the etymology endpoint.

use futures::StreamExt;
use reqwest::Client;
use url::Url;

use super::session::{CacheStatus, ClientSession};
use crate::error::{EtymologyError, Result};

/// Decodes UTF-8 across chunk boundaries.
#[derive(Debug, Default)]
struct Utf8Buffer {
    pending: Vec<u8>,
}

impl Utf8Buffer {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            // Invalid (not merely truncated) bytes: decode lossily and move on.
            Err(_) => self.pending.len(),
        };
        let done: Vec<u8> = self.pending.drain(..valid).collect();
        String::from_utf8_lossy(&done).into_owned()
    }
}

/// Talks to a running etymology server.
#[derive(Debug, Clone)]
pub struct EtymologyClient {
    client: Client,
    base_url: Url,
}

impl EtymologyClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| EtymologyError::Config(format!("invalid server URL '{}': {}", base_url, e)))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self) -> Result<Url> {
        self.base_url
            .join("/etymology")
            .map_err(|e| EtymologyError::Config(format!("invalid server URL: {}", e)))
    }

    /// Run one lookup for the session's word and era.
    ///
    /// `on_update` is called after every body chunk while streaming. The
    /// outcome lands in the session (`Complete` or `Error`); transport
    /// failures are also returned as `Err`. A blank word is a no-op.
    pub async fn lookup<F>(&self, session: &mut ClientSession, mut on_update: F) -> Result<()>
    where
        F: FnMut(&ClientSession),
    {
        let Some(request) = session.submit() else {
            return Ok(());
        };

        let response = match self.client.post(self.endpoint()?).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                session.fail(format!("Could not reach the server: {}", e));
                return Err(e.into());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            session.fail_with_status(status.as_u16(), &body);
            return Ok(());
        }

        session.set_cache_status(
            response
                .headers()
                .get("x-cache")
                .and_then(|v| v.to_str().ok())
                .and_then(CacheStatus::from_header),
        );

        let mut decoder = Utf8Buffer::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    let text = decoder.push(&bytes);
                    if !text.is_empty() {
                        session.push_chunk(&text);
                        on_update(session);
                    }
                }
                Err(e) => {
                    session.fail(format!("Response interrupted: {}", e));
                    return Err(e.into());
                }
            }
        }

        session.finish();
        on_update(session);
        Ok(())
    }

    /// Shareable deep link for `word` in `era`: `{base}/?word=..&era=..`.
    pub fn share_url(&self, word: &str, era: &str) -> Url {
        share_url(&self.base_url, word, era)
    }
}

/// Deep link that pre-fills a lookup.
pub fn share_url(base: &Url, word: &str, era: &str) -> Url {
    let mut url = base.clone();
    url.set_path("/");
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("word", word.trim())
        .append_pair("era", era);
    url
}
