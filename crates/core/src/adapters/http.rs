//! Shared HTTP plumbing for adapters.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::warn;

use crate::errors::AdapterError;

/// Per-request timeout when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub(crate) fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Build a client whose every request is bounded by `timeout_secs`.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client, AdapterError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("rostersync/", env!("CARGO_PKG_VERSION"))),
    );
    let timeout = if timeout_secs == 0 {
        DEFAULT_TIMEOUT_SECS
    } else {
        timeout_secs
    };
    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(timeout))
        .build()
        .map_err(|e| AdapterError::InvalidConfig(format!("failed to build HTTP client: {}", e)))
}

/// Turn a non-success response into [`AdapterError::Api`], keeping the body.
pub async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "API returned error");
    Err(AdapterError::Api {
        status: status.as_u16(),
        body,
    })
}

/// Render a JSON scalar as a string. Arrays, objects and null yield `None`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Strip any trailing slash so paths can be appended with `format!`.
pub fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
