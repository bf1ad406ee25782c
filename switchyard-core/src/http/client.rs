//! reqwest-backed dispatcher

use super::error::map_http_error;
use super::Dispatch;
use crate::config::ConnectionConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::providers::Provider;
use crate::transformers::{ProviderResponse, RequestConfig, RequestContext, ResponseBody};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, ClientBuilder, Proxy};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

const USER_AGENT: &str = concat!("switchyard/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client with connection pooling
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new(connection: &ConnectionConfig) -> GatewayResult<Self> {
        let mut builder = ClientBuilder::new()
            .pool_max_idle_per_host(connection.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(connection.keepalive_secs))
            .connect_timeout(Duration::from_millis(connection.connect_timeout_ms))
            .timeout(Duration::from_millis(connection.request_timeout_ms))
            .user_agent(USER_AGENT)
            .gzip(true);

        if let Some(proxy) = connection.https_proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = Proxy::all(proxy).map_err(|e| {
                GatewayError::Internal(format!("Invalid https_proxy '{}': {}", proxy, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Bearer credentials first, then transformer headers on top
    fn build_headers(provider: &Provider, config: &RequestConfig, ctx: &RequestContext) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) =
            HeaderValue::from_str(&format!("Bearer {}", provider.api_key().expose_secret()))
        {
            headers.insert(AUTHORIZATION, value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&ctx.request_id.to_string()) {
            headers.insert("x-request-id", value);
        }

        for (name, value) in &config.headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                debug!("Skipping invalid header name '{}' [request_id: {}]", name, ctx.request_id);
                continue;
            };
            if value.is_empty() {
                headers.remove(&name);
                continue;
            }
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => debug!(
                    "Skipping invalid value for header '{}' [request_id: {}]",
                    name, ctx.request_id
                ),
            }
        }
        headers
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(
        &self,
        provider: &Provider,
        body: Value,
        config: RequestConfig,
        ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        let url = config.url.as_deref().unwrap_or(provider.base_url());
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&ctx.model)
            .to_string();
        debug!(
            "Dispatching to {} ({}) [request_id: {}]",
            provider.name(),
            url,
            ctx.request_id
        );

        let payload = serde_json::to_vec(&body)?;
        let response = self
            .client
            .post(url)
            .headers(Self::build_headers(provider, &config, ctx))
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                warn!(
                    "Request to {} failed [request_id: {}]: {}",
                    provider.name(),
                    ctx.request_id,
                    e
                );
                GatewayError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.ok();
            let err = map_http_error(status, text, provider.name(), &model);
            error!("[provider_response_error] {} [request_id: {}]", err, ctx.request_id);
            return Err(err);
        }

        let headers = response.headers().clone();
        let is_event_stream = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let body = if is_event_stream {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| GatewayError::Stream(e.to_string())));
            ResponseBody::Stream(Box::pin(stream))
        } else {
            let bytes = response.bytes().await?;
            let json = serde_json::from_slice(&bytes).map_err(|e| {
                error!(
                    "Failed to parse response from {} [request_id: {}]: {}",
                    provider.name(),
                    ctx.request_id,
                    e
                );
                GatewayError::Internal(format!("Invalid response format: {}", e))
            })?;
            ResponseBody::Json(json)
        };

        Ok(ProviderResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}
