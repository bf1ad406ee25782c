//! Anthropic Messages endpoint
//!
//! Serves `/v1/messages`: inbound Messages requests are lowered to the unified
//! chat shape, and unified responses are raised back into Messages bodies or
//! event streams.

mod request;
mod response;
mod stream;

use super::{ProviderResponse, RequestConfig, RequestContext, Transformed, Transformer};
use crate::error::{GatewayError, GatewayResult};
use crate::providers::Provider;
use crate::streaming::{rewrite_stream, SseRewriter};
use async_trait::async_trait;
use serde_json::Value;

pub(crate) use stream::ChatToMessagesStream;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Default)]
pub struct AnthropicTransformer;

impl AnthropicTransformer {
    pub const NAME: &'static str = "anthropic";
    pub const ENDPOINT: &'static str = "/v1/messages";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for AnthropicTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn endpoint(&self) -> Option<&str> {
        Some(Self::ENDPOINT)
    }

    async fn transform_request_out(
        &self,
        body: Value,
        _ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        request::to_unified(body)
            .map(Transformed::body)
            .map_err(GatewayError::InvalidRequest)
    }

    async fn transform_response_in(
        &self,
        response: ProviderResponse,
        ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        let model = ctx.model.clone();
        Ok(response
            .map_json(|body| response::to_anthropic_message(body, &ctx.model))
            .map_stream(|input| {
                rewrite_stream(input, SseRewriter::new(ChatToMessagesStream::new(model)))
            }))
    }

    /// Swap the caller's credentials for the provider's
    ///
    /// An empty `Authorization` value tells the dispatcher to drop that header.
    async fn auth(
        &self,
        body: Value,
        provider: &Provider,
        _ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        let config = RequestConfig::default()
            .with_header("x-api-key", provider.api_key().expose_secret())
            .with_header("anthropic-version", ANTHROPIC_VERSION)
            .with_header("Authorization", "");
        Ok(Transformed::with_config(body, config))
    }
}
