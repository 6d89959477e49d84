//! Shared HTTP client, SSE parsing, and auth utilities.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::SwitchboardError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// No overall request timeout is set: completion streams can legitimately run
/// for minutes. Idle streams are bounded by the aggregator instead.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Headers for Azure-style deployments (`api-key`).
pub fn api_key_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("api-key", val);
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]" and non-data lines.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Splits a byte stream into SSE lines.
///
/// Bytes are kept until a full line has arrived, so a multi-byte character
/// split across network reads decodes intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
    closed: bool,
}

impl SseLineBuffer {
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Mark the end of input; a trailing line without a newline is released.
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Next complete line, trimmed. Invalid UTF-8 is a transport error.
    pub fn next_line(&mut self) -> Option<Result<String, SwitchboardError>> {
        let end = match self.buffer.iter().position(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None if self.closed && !self.buffer.is_empty() => self.buffer.len(),
            None => return None,
        };
        let raw: Vec<u8> = self.buffer.drain(..end).collect();
        Some(match std::str::from_utf8(&raw) {
            Ok(line) => Ok(line.trim().to_string()),
            Err(e) => Err(SwitchboardError::Transport(format!(
                "invalid UTF-8 in event stream: {e}"
            ))),
        })
    }
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> SwitchboardError {
    match status {
        401 | 403 => SwitchboardError::Authentication(error_message(body)),
        429 => SwitchboardError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => SwitchboardError::api(status, error_message(body)),
    }
}

/// Prefer `error.message` from a JSON body, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}
