//! Inbound request orchestration

use super::{FallbackCoordinator, PipelineExecutor};
use crate::config::{split_model_ref, ConfigService, GatewayConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::http::{Dispatch, HttpDispatcher};
use crate::protocol::{MessagesRequest, TokenizeRequest};
use crate::providers::ProviderRegistry;
use crate::router::{CustomRouter, Router, SessionUsageCache};
use crate::telemetry::{StatsSink, TokenSpeedMonitor, TracingStatsSink};
use crate::tokenizer::{Tokenizer, TokenizerResult, TokenizerService};
use crate::transformers::{
    AnthropicTransformer, ProviderResponse, RequestContext, ResponseBody, TransformerRegistry,
};
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

/// Every service a request touches, built once at startup
pub struct Gateway {
    config: ConfigService,
    transformers: Arc<TransformerRegistry>,
    providers: Arc<ProviderRegistry>,
    tokenizers: Arc<TokenizerService>,
    router: Router,
    executor: PipelineExecutor,
    fallback: FallbackCoordinator,
    telemetry: Arc<TokenSpeedMonitor>,
}

impl Gateway {
    /// Gateway dispatching over HTTP with the configured connection settings
    pub fn from_config(config: GatewayConfig) -> GatewayResult<Self> {
        let dispatcher = HttpDispatcher::new(&config.connection)?;
        Self::new(config, Arc::new(dispatcher))
    }

    pub fn new(config: GatewayConfig, dispatcher: Arc<dyn Dispatch>) -> GatewayResult<Self> {
        Self::with_stats_sink(config, dispatcher, Arc::new(TracingStatsSink))
    }

    pub fn with_stats_sink(
        config: GatewayConfig,
        dispatcher: Arc<dyn Dispatch>,
        sink: Arc<dyn StatsSink>,
    ) -> GatewayResult<Self> {
        let transformers = Arc::new(TransformerRegistry::with_builtins());
        let providers = Arc::new(ProviderRegistry::from_configs(
            config.providers.clone(),
            Arc::clone(&transformers),
        )?);
        let tokenizers = Arc::new(
            TokenizerService::new(config.tokenizer.clone())
                .map_err(|e| GatewayError::Internal(format!("Tokenizer service: {}", e)))?,
        );
        let usage = Arc::new(SessionUsageCache::default());
        let fallback = FallbackCoordinator::new(Arc::clone(&providers), config.fallback.clone());

        let config = ConfigService::new(config);
        let router = Router::new(
            config.clone(),
            Arc::clone(&providers),
            Arc::clone(&tokenizers),
            Arc::clone(&usage),
        );

        Ok(Self {
            config,
            transformers,
            providers,
            tokenizers,
            router,
            executor: PipelineExecutor::new(dispatcher),
            fallback,
            telemetry: TokenSpeedMonitor::new(sink, usage),
        })
    }

    pub fn with_custom_router(self, custom: Arc<dyn CustomRouter>) -> Self {
        Self {
            router: self.router.with_custom_router(custom),
            ..self
        }
    }

    pub fn config(&self) -> &ConfigService {
        &self.config
    }

    pub fn transformers(&self) -> &Arc<TransformerRegistry> {
        &self.transformers
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn tokenizers(&self) -> &Arc<TokenizerService> {
        &self.tokenizers
    }

    pub fn telemetry(&self) -> &Arc<TokenSpeedMonitor> {
        &self.telemetry
    }

    /// Route, execute and, on an upstream error, fall back
    pub async fn handle(
        &self,
        endpoint: &str,
        body: Value,
        headers: &HeaderMap,
    ) -> GatewayResult<ProviderResponse> {
        let ctx = RequestContext::new(endpoint);
        let span = info_span!("request", request_id = %ctx.request_id, endpoint = endpoint);
        self.handle_in_context(ctx, body, headers)
            .instrument(span)
            .await
    }

    async fn handle_in_context(
        &self,
        ctx: RequestContext,
        mut body: Value,
        headers: &HeaderMap,
    ) -> GatewayResult<ProviderResponse> {
        let transformer = self.transformers.for_endpoint(&ctx.endpoint).ok_or_else(|| {
            GatewayError::InvalidRequest(format!("No transformer serves {}", ctx.endpoint))
        })?;

        let routed = self.router.route(&mut body).await;
        let model_ref = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (provider_name, model) = split_model_ref(&model_ref).ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "Model '{}' is not of the form provider,model",
                model_ref
            ))
        })?;
        let provider = self
            .providers
            .get(provider_name)
            .filter(|p| p.is_enabled())
            .ok_or_else(|| GatewayError::ProviderNotFound(provider_name.to_string()))?;

        let mut ctx = ctx.with_target(provider_name, model);
        ctx.scenario = routed.scenario;
        ctx.session_id = routed.session_id;
        ctx.stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        debug!(
            "Dispatching to {} (scenario: {}, stream: {}) [request_id: {}]",
            model_ref, ctx.scenario, ctx.stream, ctx.request_id
        );

        let (response, ctx) = match self
            .executor
            .execute(&transformer, &provider, body.clone(), headers, &ctx)
            .await
        {
            Ok(response) => (response, ctx),
            Err(e) if e.is_fallback_eligible() => {
                warn!(
                    "Request to {} failed, trying fallback [request_id: {}]: {}",
                    model_ref, ctx.request_id, e
                );
                self.fallback
                    .run(&self.executor, &transformer, &body, headers, &ctx, e)
                    .await?
            }
            Err(e) => {
                warn!("Request to {} failed [request_id: {}]: {}", model_ref, ctx.request_id, e);
                return Err(e);
            }
        };

        Ok(self.observe(response, &ctx).await)
    }

    /// Feed Messages-format responses to the token speed monitor
    async fn observe(&self, response: ProviderResponse, ctx: &RequestContext) -> ProviderResponse {
        if ctx.endpoint != AnthropicTransformer::ENDPOINT {
            return response;
        }
        let tokenizer = self.tokenizer_for(ctx).await;
        let ProviderResponse {
            status,
            headers,
            body,
        } = response;
        let body = match body {
            ResponseBody::Stream(stream) => {
                ResponseBody::Stream(self.telemetry.observe_stream(ctx, tokenizer, stream))
            }
            ResponseBody::Json(value) => {
                self.telemetry
                    .record_response(ctx, &value, tokenizer.as_deref());
                ResponseBody::Json(value)
            }
        };
        ProviderResponse {
            status,
            headers,
            body,
        }
    }

    async fn tokenizer_for(&self, ctx: &RequestContext) -> Option<Arc<dyn Tokenizer>> {
        let provider = self.providers.get(&ctx.provider)?;
        let config = provider.tokenizer_config_for(&ctx.model)?;
        Some(self.tokenizers.get_tokenizer(config).await)
    }

    /// Count input tokens for a Messages body
    ///
    /// A `provider,model` body model selects that model's tokenizer; anything
    /// else is counted with the fallback.
    pub async fn count_tokens(&self, body: Value) -> GatewayResult<TokenizerResult> {
        let request: MessagesRequest = serde_json::from_value(body)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        let resolved = split_model_ref(&request.model)
            .and_then(|(p, m)| self.providers.resolve_model(p, m));
        let config = resolved
            .as_ref()
            .and_then(|(provider, model)| provider.tokenizer_config_for(model));
        Ok(self
            .tokenizers
            .count_tokens(&TokenizeRequest::from(&request), config)
            .await)
    }
}
