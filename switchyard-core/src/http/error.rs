//! Upstream error mapping

use crate::error::GatewayError;
use reqwest::StatusCode;
use serde_json::Value;

/// Build the fallback-eligible error for a non-2xx upstream answer
pub fn map_http_error(
    status: StatusCode,
    body: Option<String>,
    provider: &str,
    model: &str,
) -> GatewayError {
    let detail = body
        .as_deref()
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| extract_error_message(&v))
        .or(body)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("HTTP error {}", status.as_u16()));

    GatewayError::ProviderResponse {
        status: status.as_u16(),
        message: format!(
            "Error from provider({},{}: {}): {}",
            provider,
            model,
            status.as_u16(),
            detail
        ),
    }
}

/// Pull a human-readable message out of common error body shapes
fn extract_error_message(json: &Value) -> Option<String> {
    // OpenAI and Anthropic: { "error": { "message": "...", "type": "..." } }
    if let Some(message) = json.pointer("/error/message").and_then(Value::as_str) {
        return Some(message.to_string());
    }

    if let Some(message) = json.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }

    json.get("error").and_then(Value::as_str).map(str::to_string)
}
