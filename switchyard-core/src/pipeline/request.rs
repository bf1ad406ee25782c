//! Request side of the transformer pipeline

use crate::error::GatewayResult;
use crate::providers::Provider;
use crate::transformers::{RequestConfig, RequestContext, Transformer};
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Inbound headers never carried into a bypassed request
const STRIPPED_HEADERS: &[&str] = &[
    "content-length",
    "host",
    "authorization",
    "x-api-key",
    "connection",
    "transfer-encoding",
    "accept-encoding",
];

/// Body and HTTP overrides ready for dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub body: Value,
    pub config: RequestConfig,
    pub bypass: bool,
}

/// Whether the provider already speaks the endpoint's wire format
///
/// The provider-level chain must be exactly the endpoint transformer, and a
/// model-level chain, if any, must be empty or exactly the same transformer.
pub fn should_bypass(endpoint: &dyn Transformer, provider: &Provider, model: &str) -> bool {
    let only_endpoint = |names: &[String]| names.len() == 1 && names[0] == endpoint.name();
    if !only_endpoint(provider.chain_names()) {
        return false;
    }
    match provider.config().transformer.models.get(model) {
        None => true,
        Some(bindings) => bindings.chain.is_empty() || only_endpoint(&bindings.chain),
    }
}

/// Runs the request hooks for one attempt
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestPipeline;

impl RequestPipeline {
    pub fn new() -> Self {
        Self
    }

    /// Shape `body` for `provider`
    ///
    /// Outside bypass the order is: endpoint `transform_request_out`, then
    /// the provider chain's `transform_request_in` with config merging, then
    /// the model chain's `transform_request_in` keeping bodies only.
    pub async fn prepare(
        &self,
        endpoint: &Arc<dyn Transformer>,
        provider: &Provider,
        mut body: Value,
        inbound: &HeaderMap,
        ctx: &RequestContext,
    ) -> GatewayResult<PreparedRequest> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), Value::String(ctx.model.clone()));
        }

        if should_bypass(endpoint.as_ref(), provider, &ctx.model) {
            debug!(
                "Bypassing transformers for {} via '{}' [request_id: {}]",
                provider.name(),
                endpoint.name(),
                ctx.request_id
            );
            let mut config = forwarded_headers(inbound);
            let authed = endpoint.auth(body, provider, ctx).await?;
            if let Some(auth_config) = authed.config {
                config.merge(auth_config);
            }
            return Ok(PreparedRequest {
                body: authed.body,
                config,
                bypass: true,
            });
        }

        let out = endpoint.transform_request_out(body, ctx).await?;
        let mut body = out.body;
        let mut config = out.config.unwrap_or_default();

        for transformer in provider.transformer_chain() {
            let transformed = transformer.transform_request_in(body, provider, ctx).await?;
            body = transformed.body;
            if let Some(extra) = transformed.config {
                config.merge(extra);
            }
        }

        for transformer in provider.model_chain(&ctx.model) {
            let transformed = transformer.transform_request_in(body, provider, ctx).await?;
            body = transformed.body;
            if transformed.config.is_some() {
                debug!(
                    "Ignoring request config from model transformer '{}' [request_id: {}]",
                    transformer.name(),
                    ctx.request_id
                );
            }
        }

        Ok(PreparedRequest {
            body,
            config,
            bypass: false,
        })
    }
}

/// Inbound headers carried as-is, minus transport and credential headers
fn forwarded_headers(inbound: &HeaderMap) -> RequestConfig {
    inbound
        .iter()
        .filter(|(name, _)| !STRIPPED_HEADERS.contains(&name.as_str()))
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .filter(|(_, value)| !value.is_empty())
        .fold(RequestConfig::default(), |config, (name, value)| {
            config.with_header(name, value)
        })
}
