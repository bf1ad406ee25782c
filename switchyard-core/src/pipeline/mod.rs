//! Request execution
//!
//! One attempt is request hooks, dispatch, then response hooks, driven by
//! [`PipelineExecutor`]. The [`FallbackCoordinator`] repeats attempts against
//! alternate targets, and [`Gateway`] composes routing, execution, fallback
//! and telemetry for an inbound request.

mod fallback;
mod gateway;
mod request;
mod response;

pub use fallback::FallbackCoordinator;
pub use gateway::Gateway;
pub use request::{should_bypass, PreparedRequest, RequestPipeline};
pub use response::{into_http_response, ResponsePipeline};

use crate::error::GatewayResult;
use crate::http::Dispatch;
use crate::providers::Provider;
use crate::transformers::{ProviderResponse, RequestContext, Transformer};
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;

/// Runs one complete attempt against one provider
pub struct PipelineExecutor {
    request: RequestPipeline,
    response: ResponsePipeline,
    dispatcher: Arc<dyn Dispatch>,
}

impl PipelineExecutor {
    pub fn new(dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            request: RequestPipeline::new(),
            response: ResponsePipeline::new(),
            dispatcher,
        }
    }

    pub async fn execute(
        &self,
        endpoint: &Arc<dyn Transformer>,
        provider: &Provider,
        body: Value,
        inbound: &HeaderMap,
        ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        let prepared = self
            .request
            .prepare(endpoint, provider, body, inbound, ctx)
            .await?;
        let response = self
            .dispatcher
            .dispatch(provider, prepared.body, prepared.config, ctx)
            .await?;
        self.response
            .finish(endpoint, provider, response, prepared.bypass, ctx)
            .await
    }
}
