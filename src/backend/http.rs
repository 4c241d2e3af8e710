//! JSON-over-HTTP plumbing shared by the HTTP backends.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::DeliveryFailure;

/// Common response envelope: `{"status": "success"|"error", "message"?, ...}`.
#[derive(Debug, Default, Deserialize)]
pub(super) struct StatusEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub tweet_id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub updated_range: Option<String>,
}

impl StatusEnvelope {
    fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// POST `body` and return the HTTP status code plus raw response text.
///
/// Timeouts and connection errors come back as transient failures.
pub(super) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    timeout: Duration,
) -> Result<(u16, String), DeliveryFailure> {
    let response = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(request_failure)?;

    let status = response.status().as_u16();
    let text = response.text().await.map_err(request_failure)?;
    debug!(status, "backend response received");
    Ok((status, text))
}

fn request_failure(err: reqwest::Error) -> DeliveryFailure {
    if err.is_timeout() {
        DeliveryFailure::transient(format!("request timed out: {err}"))
    } else if err.is_connect() || err.is_request() || err.is_body() {
        DeliveryFailure::transient(format!("connection failed: {err}"))
    } else {
        DeliveryFailure::new(format!("HTTP request failed: {err}"))
    }
}

/// Interpret a response whose success is signalled by HTTP 2xx plus
/// `status = "success"` in the body.
pub(super) fn expect_success(status: u16, text: &str) -> Result<StatusEnvelope, DeliveryFailure> {
    let envelope = serde_json::from_str::<StatusEnvelope>(text).ok();

    if !(200..300).contains(&status) {
        let message = envelope
            .and_then(|e| e.message)
            .unwrap_or_else(|| fallback_message(text, status));
        return Err(DeliveryFailure::http(status, message));
    }

    let envelope = envelope.ok_or_else(|| {
        DeliveryFailure::http(status, format!("unparseable response body: {}", truncate(text)))
    })?;
    if envelope.is_success() {
        Ok(envelope)
    } else {
        let message = envelope
            .message
            .clone()
            .unwrap_or_else(|| "backend reported an error without a message".into());
        Err(DeliveryFailure::http(status, message))
    }
}

/// Interpret a response where any 2xx means the hand-off succeeded; the
/// body, if JSON, may still report an explicit error.
pub(super) fn expect_accepted(status: u16, text: &str) -> Result<StatusEnvelope, DeliveryFailure> {
    let envelope = serde_json::from_str::<StatusEnvelope>(text).ok();

    if !(200..300).contains(&status) {
        let message = envelope
            .and_then(|e| e.message)
            .unwrap_or_else(|| fallback_message(text, status));
        return Err(DeliveryFailure::http(status, message));
    }

    let envelope = envelope.unwrap_or_default();
    if envelope.status.as_deref() == Some("error") {
        let message = envelope
            .message
            .clone()
            .unwrap_or_else(|| "relay rejected the row".into());
        return Err(DeliveryFailure::http(status, message));
    }
    Ok(envelope)
}

fn fallback_message(text: &str, status: u16) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        format!("backend returned HTTP {status}")
    } else {
        truncate(trimmed)
    }
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 500;
    if text.chars().count() <= LIMIT {
        text.to_owned()
    } else {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}
