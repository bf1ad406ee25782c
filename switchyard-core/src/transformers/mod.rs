//! Request and response transformers
//!
//! A transformer adapts payloads between the unified chat shape and one wire
//! format. Endpoint transformers own an inbound route and translate the
//! caller's format; provider transformers reshape for a particular upstream.
//! Every hook defaults to identity, so a transformer implements only what it
//! changes.

mod anthropic;
mod cerebras;
mod forcereasoning;
mod openai;
mod registry;
mod responses;

pub use anthropic::AnthropicTransformer;
pub use cerebras::CerebrasTransformer;
pub use forcereasoning::ForceReasoningTransformer;
pub use openai::OpenAITransformer;
pub use registry::{TransformerInfo, TransformerRegistry};
pub use responses::OpenAIResponsesTransformer;

use crate::config::ScenarioType;
use crate::error::GatewayResult;
use crate::providers::Provider;
use crate::streaming::ByteStream;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Per-request HTTP settings a hook may override
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestConfig {
    /// Replaces the provider's base URL
    pub url: Option<String>,
    /// Added to the outbound request, overriding defaults
    ///
    /// Names are stored lowercase. An empty value removes the header.
    pub headers: HashMap<String, String>,
}

impl RequestConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Layer `other` on top: its URL wins when set, its headers override
    pub fn merge(&mut self, other: RequestConfig) {
        if other.url.is_some() {
            self.url = other.url;
        }
        self.headers.extend(
            other
                .headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value)),
        );
    }
}

/// Body produced by a request hook, plus optional HTTP overrides
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub body: Value,
    pub config: Option<RequestConfig>,
}

impl Transformed {
    pub fn body(body: Value) -> Self {
        Self { body, config: None }
    }

    pub fn with_config(body: Value, config: RequestConfig) -> Self {
        Self {
            body,
            config: Some(config),
        }
    }
}

/// Response payload, buffered JSON or a live byte stream
pub enum ResponseBody {
    Json(Value),
    Stream(ByteStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An upstream response moving back through the pipeline
#[derive(Debug)]
pub struct ProviderResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ProviderResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Json(body),
        }
    }

    pub fn stream(status: u16, body: ByteStream) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Stream(body),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Apply `f` to a JSON body; streams pass through untouched
    pub fn map_json(self, f: impl FnOnce(Value) -> Value) -> Self {
        match self.body {
            ResponseBody::Json(value) => Self {
                body: ResponseBody::Json(f(value)),
                ..self
            },
            ResponseBody::Stream(_) => self,
        }
    }

    /// Apply `f` to a stream body; JSON passes through untouched
    pub fn map_stream(self, f: impl FnOnce(ByteStream) -> ByteStream) -> Self {
        match self.body {
            ResponseBody::Stream(stream) => Self {
                body: ResponseBody::Stream(f(stream)),
                ..self
            },
            ResponseBody::Json(_) => self,
        }
    }
}

/// Per-request identity and routing facts shared with every hook
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// Inbound route, e.g. `/v1/messages`
    pub endpoint: String,
    pub provider: String,
    pub model: String,
    pub scenario: ScenarioType,
    pub session_id: Option<String>,
    pub stream: bool,
    pub started_at: Instant,
}

impl RequestContext {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            endpoint: endpoint.into(),
            provider: String::new(),
            model: String::new(),
            scenario: ScenarioType::Default,
            session_id: None,
            stream: false,
            started_at: Instant::now(),
        }
    }

    pub fn with_target(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    /// Context for a retry against another target, under a new request id
    pub fn retarget(&self, provider: &str, model: &str) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            provider: provider.to_string(),
            model: model.to_string(),
            started_at: Instant::now(),
            ..self.clone()
        }
    }
}

/// Adapter between the unified chat shape and one wire format
#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    /// Inbound route this transformer serves, for endpoint transformers
    fn endpoint(&self) -> Option<&str> {
        None
    }

    /// Endpoint format to unified request
    async fn transform_request_out(
        &self,
        body: Value,
        _ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        Ok(Transformed::body(body))
    }

    /// Unified request to the provider's format
    async fn transform_request_in(
        &self,
        body: Value,
        _provider: &Provider,
        _ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        Ok(Transformed::body(body))
    }

    /// Provider response to unified response
    async fn transform_response_out(
        &self,
        response: ProviderResponse,
        _ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        Ok(response)
    }

    /// Unified response to the endpoint format
    async fn transform_response_in(
        &self,
        response: ProviderResponse,
        _ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        Ok(response)
    }

    /// Credentials and headers for a request sent without reshaping
    async fn auth(
        &self,
        body: Value,
        _provider: &Provider,
        _ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        Ok(Transformed::body(body))
    }
}

impl fmt::Debug for dyn Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("name", &self.name())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}
