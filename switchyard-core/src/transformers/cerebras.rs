use super::{RequestConfig, RequestContext, Transformed, Transformer};
use crate::error::GatewayResult;
use crate::providers::Provider;
use async_trait::async_trait;
use serde_json::Value;

/// Cerebras accepts no `reasoning` object; reasoning is opt-out instead
#[derive(Debug, Default)]
pub struct CerebrasTransformer;

impl CerebrasTransformer {
    pub const NAME: &'static str = "cerebras";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for CerebrasTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn transform_request_in(
        &self,
        mut body: Value,
        provider: &Provider,
        _ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        if let Some(obj) = body.as_object_mut() {
            if obj.remove("reasoning").is_none() {
                obj.insert("disable_reasoning".to_string(), Value::Bool(false));
            }
        }

        let config = RequestConfig::default()
            .with_header(
                "Authorization",
                format!("Bearer {}", provider.api_key().expose_secret()),
            )
            .with_header("Content-Type", "application/json");
        Ok(Transformed::with_config(body, config))
    }
}
