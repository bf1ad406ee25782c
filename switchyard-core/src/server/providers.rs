//! Runtime provider management
//!
//! Changes apply to the in-memory registry only and are lost on restart.

use super::{json_body, AppState};
use crate::config::ProviderConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::providers::{ProviderInfo, ProviderUpdate};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub(super) struct ToggleRequest {
    enabled: bool,
}

pub(super) async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderInfo>> {
    let providers = state.gateway.providers().list();
    Json(providers.iter().map(|p| ProviderInfo::from(p.as_ref())).collect())
}

pub(super) async fn create_provider(
    State(state): State<AppState>,
    body: Result<Json<ProviderConfig>, JsonRejection>,
) -> GatewayResult<Json<ProviderInfo>> {
    let config = json_body(body)?;
    let provider = state.gateway.providers().register(config)?;
    Ok(Json(ProviderInfo::from(provider.as_ref())))
}

pub(super) async fn get_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<ProviderInfo>> {
    let provider = state
        .gateway
        .providers()
        .get(&name)
        .ok_or(GatewayError::ProviderNotFound(name))?;
    Ok(Json(ProviderInfo::from(provider.as_ref())))
}

pub(super) async fn update_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<ProviderUpdate>, JsonRejection>,
) -> GatewayResult<Json<ProviderInfo>> {
    let update = json_body(body)?;
    let provider = state.gateway.providers().update(&name, update)?;
    Ok(Json(ProviderInfo::from(provider.as_ref())))
}

pub(super) async fn delete_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> GatewayResult<Json<Value>> {
    state.gateway.providers().remove(&name)?;
    Ok(Json(json!({ "message": "Provider deleted successfully" })))
}

pub(super) async fn toggle_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<ToggleRequest>, JsonRejection>,
) -> GatewayResult<Json<Value>> {
    let ToggleRequest { enabled } = json_body(body)?;
    state.gateway.providers().toggle(&name, enabled)?;
    let state_word = if enabled { "enabled" } else { "disabled" };
    Ok(Json(json!({
        "message": format!("Provider {} successfully", state_word)
    })))
}
