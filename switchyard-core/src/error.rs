//! Request-path error taxonomy
//!
//! Every failure that can reach an inbound caller is a [`GatewayError`]. Each
//! variant carries a stable machine-readable code and the HTTP status the
//! server answers with. Only [`GatewayError::ProviderResponse`] is eligible for
//! fallback to an alternate provider.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced by the gateway to its callers
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed client input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A provider name did not resolve
    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    /// Registration conflict
    #[error("Provider '{0}' already exists")]
    ProviderExists(String),

    /// Upstream answered with a non-2xx status
    #[error("Provider responded with status {status}: {message}")]
    ProviderResponse { status: u16, message: String },

    /// A transformer hook rejected or could not reshape a payload
    #[error("Transformer '{transformer}' failed: {message}")]
    Transformer { transformer: String, message: String },

    /// Connection-level failure talking to a provider
    #[error("Network error: {0}")]
    Network(String),

    /// The upstream call exceeded its deadline
    #[error("Upstream request timed out")]
    Timeout,

    /// Failure while reshaping a streamed body
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code reported in response bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::ProviderNotFound(_) => "provider_not_found",
            Self::ProviderExists(_) => "provider_exists",
            Self::ProviderResponse { .. } => "provider_response_error",
            Self::Transformer { .. } => "transformer_error",
            Self::Network(_) => "network_error",
            Self::Timeout => "timeout",
            Self::Stream(_) => "stream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::ProviderExists(_) => StatusCode::BAD_REQUEST,
            Self::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            Self::ProviderResponse { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Transformer { .. } | Self::Stream(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the fallback coordinator may retry this failure elsewhere
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(self, Self::ProviderResponse { .. })
    }

    pub(crate) fn transformer(name: &str, message: impl std::fmt::Display) -> Self {
        Self::Transformer {
            transformer: name.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_connect() {
            GatewayError::Network(format!("Connection failed: {}", err))
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Internal(format!("JSON error: {}", err))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": "api_error",
                "code": self.code(),
            }
        });
        (status, Json(body)).into_response()
    }
}
