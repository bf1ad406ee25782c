use super::{json_body, AppState};
use crate::pipeline::into_http_response;
use axum::extract::rejection::JsonRejection;
use axum::extract::{MatchedPath, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

pub(super) async fn root() -> Json<Value> {
    Json(json!({
        "message": "LLMs API",
        "version": crate::version(),
    }))
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Shared handler for every transformer-bound route
pub(super) async fn transformer_endpoint(
    State(state): State<AppState>,
    path: MatchedPath,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    match state.gateway.handle(path.as_str(), body, &headers).await {
        Ok(response) => into_http_response(response),
        Err(e) => e.into_response(),
    }
}

pub(super) async fn count_tokens(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let body = match json_body(body) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    match state.gateway.count_tokens(body).await {
        Ok(result) => Json(json!({
            "input_tokens": result.token_count,
            "tokenizer": result.tokenizer_used,
        }))
        .into_response(),
        Err(e) => e.into_response(),
    }
}

pub(super) async fn list_transformers(State(state): State<AppState>) -> Response {
    Json(state.gateway.transformers().list()).into_response()
}

/// Configuration with credentials redacted
pub(super) async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.config().get_all())
}
