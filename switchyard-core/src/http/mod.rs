//! Outbound HTTP to providers
//!
//! The [`Dispatch`] trait is the seam between the pipelines and the network;
//! [`HttpDispatcher`] is the reqwest implementation used in production.

pub mod client;
pub mod error;

pub use client::HttpDispatcher;
pub use error::map_http_error;

use crate::error::GatewayResult;
use crate::providers::Provider;
use crate::transformers::{ProviderResponse, RequestConfig, RequestContext};
use async_trait::async_trait;
use serde_json::Value;

/// Sends a prepared request to a provider
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// POST `body` to `config.url` or the provider's base URL
    ///
    /// Non-2xx answers come back as [`GatewayError::ProviderResponse`].
    ///
    /// [`GatewayError::ProviderResponse`]: crate::error::GatewayError::ProviderResponse
    async fn dispatch(
        &self,
        provider: &Provider,
        body: Value,
        config: RequestConfig,
        ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse>;
}
