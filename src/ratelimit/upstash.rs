//! Upstash Redis REST rate limiter.
//!
//! Speaks the same sliding-window protocol as the `@upstash/ratelimit`
//! client so limits are shared with anything else using the same prefix:
//! two fixed buckets per identifier, the previous one weighted by how much
//! of it still overlaps the trailing window.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{RateLimitBackend, RateLimitDecision};
use crate::config::{RateLimitConfig, UpstashConfig};
use crate::error::{EtymologyError, Result};

/// Sliding-window admission script. Returns remaining tokens, or -1 when denied.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local currentKey  = KEYS[1]
local previousKey = KEYS[2]
local tokens      = tonumber(ARGV[1])
local now         = ARGV[2]
local window      = ARGV[3]
local incrementBy = ARGV[4]

local requestsInCurrentWindow = redis.call("GET", currentKey)
if requestsInCurrentWindow == false then
  requestsInCurrentWindow = 0
end

local requestsInPreviousWindow = redis.call("GET", previousKey)
if requestsInPreviousWindow == false then
  requestsInPreviousWindow = 0
end
local percentageInCurrent = ( now % window ) / window
requestsInPreviousWindow = math.floor(( 1 - percentageInCurrent ) * requestsInPreviousWindow)
if requestsInPreviousWindow + requestsInCurrentWindow >= tokens then
  return -1
end

local newValue = redis.call("INCRBY", currentKey, incrementBy)
if newValue == tonumber(incrementBy) then
  redis.call("PEXPIRE", currentKey, window * 2 + 1000)
end
return tokens - ( newValue + requestsInPreviousWindow )
"#;

/// Analytics events are grouped into hourly hashes.
const ANALYTICS_BUCKET_MS: i64 = 3_600_000;

/// Reply envelope of the Upstash REST API.
#[derive(Debug, Deserialize)]
struct UpstashReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Rate limiter backed by Upstash Redis over its REST API.
pub struct UpstashLimiter {
    client: reqwest::Client,
    creds: UpstashConfig,
    prefix: String,
    max_requests: u32,
    window: Duration,
    analytics: bool,
}

impl UpstashLimiter {
    pub fn new(client: reqwest::Client, creds: UpstashConfig, config: &RateLimitConfig) -> Self {
        Self {
            client,
            creds,
            prefix: config.prefix.clone(),
            max_requests: config.max_requests,
            window: config.window,
            analytics: config.analytics,
        }
    }

    fn window_ms(&self) -> i64 {
        (self.window.as_millis() as i64).max(1)
    }

    /// Bucket keys `(current, previous)` for `identifier` at `now_ms`.
    fn bucket_keys(&self, identifier: &str, now_ms: i64) -> (String, String) {
        let current = now_ms / self.window_ms();
        (
            format!("{}:{}:{}", self.prefix, identifier, current),
            format!("{}:{}:{}", self.prefix, identifier, current - 1),
        )
    }

    fn eval_command(&self, identifier: &str, now_ms: i64) -> Value {
        let (current, previous) = self.bucket_keys(identifier, now_ms);
        json!([
            "EVAL",
            SLIDING_WINDOW_SCRIPT,
            "2",
            current,
            previous,
            self.max_requests.to_string(),
            now_ms.to_string(),
            self.window_ms().to_string(),
            "1"
        ])
    }

    fn analytics_command(&self, identifier: &str, success: bool, now_ms: i64) -> Value {
        let bucket = now_ms / ANALYTICS_BUCKET_MS * ANALYTICS_BUCKET_MS;
        let outcome = if success { "success" } else { "blocked" };
        json!([
            "HINCRBY",
            format!("{}:analytics:events:{}", self.prefix, bucket),
            format!("{}:{}", identifier, outcome),
            "1"
        ])
    }

    /// Interpret the script's return value.
    fn decision_from_reply(&self, reply: UpstashReply, now_ms: i64) -> Result<RateLimitDecision> {
        if let Some(err) = reply.error {
            return Err(EtymologyError::RateLimit(format!("Upstash error: {}", err)));
        }
        let remaining = reply
            .result
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                EtymologyError::RateLimit(format!(
                    "unexpected Upstash reply: {:?}",
                    reply.result
                ))
            })?;

        let window_ms = self.window_ms();
        let reset = ((now_ms / window_ms) + 1) * window_ms;
        Ok(RateLimitDecision {
            success: remaining >= 0,
            limit: self.max_requests,
            remaining: remaining.max(0) as u32,
            reset: reset.max(0) as u64,
        })
    }

    async fn send(client: &reqwest::Client, creds: &UpstashConfig, command: &Value) -> Result<UpstashReply> {
        let response = client
            .post(&creds.url)
            .bearer_auth(&creds.token)
            .json(command)
            .send()
            .await
            .map_err(|e| EtymologyError::RateLimit(format!("Upstash request failed: {}", e)))?;

        let status = response.status();
        let reply: UpstashReply = response.json().await.map_err(|e| {
            EtymologyError::RateLimit(format!("Failed to parse Upstash reply ({}): {}", status, e))
        })?;
        if !status.is_success() && reply.error.is_none() {
            return Err(EtymologyError::RateLimit(format!(
                "Upstash returned HTTP {}",
                status
            )));
        }
        Ok(reply)
    }

    /// Fire-and-forget analytics write. Never delays or fails the check.
    fn record_analytics(&self, identifier: &str, success: bool, now_ms: i64) {
        let command = self.analytics_command(identifier, success, now_ms);
        let client = self.client.clone();
        let creds = self.creds.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::send(&client, &creds, &command).await {
                debug!(error = %e, "Dropping rate limit analytics event");
            }
        });
    }
}

#[async_trait]
impl RateLimitBackend for UpstashLimiter {
    async fn limit(&self, identifier: &str) -> Result<RateLimitDecision> {
        let now_ms = Utc::now().timestamp_millis();
        let command = self.eval_command(identifier, now_ms);
        let reply = Self::send(&self.client, &self.creds, &command).await?;
        let decision = self.decision_from_reply(reply, now_ms)?;

        if self.analytics {
            self.record_analytics(identifier, decision.success, now_ms);
        }
        Ok(decision)
    }

    fn name(&self) -> &str {
        "upstash"
    }
}
