//! Request identification helpers.
//!
//! The rate limiter keys on the client address as reported by the reverse
//! proxy in front of the service.

use axum::http::HeaderMap;

/// Identifier used when no forwarding header is present.
pub const FALLBACK_IDENTIFIER: &str = "127.0.0.1";

/// Rate-limit identifier for a request.
///
/// First comma-separated entry of `X-Forwarded-For`, trimmed. Falls back to
/// [`FALLBACK_IDENTIFIER`] when the header is missing, unreadable or blank.
pub fn client_identifier(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(FALLBACK_IDENTIFIER)
        .to_string()
}
