//! Scenario-keyed fallback after an upstream error

use super::PipelineExecutor;
use crate::config::{split_model_ref, FallbackConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::providers::ProviderRegistry;
use crate::transformers::{ProviderResponse, RequestContext, Transformer};
use axum::http::HeaderMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Retries a failed request against the scenario's fallback candidates
///
/// Candidates are tried one at a time, in configured order. Each attempt gets
/// a fresh [`RequestContext`] and a full pipeline run; the first success wins.
pub struct FallbackCoordinator {
    providers: Arc<ProviderRegistry>,
    fallback: FallbackConfig,
}

impl FallbackCoordinator {
    pub fn new(providers: Arc<ProviderRegistry>, fallback: FallbackConfig) -> Self {
        Self {
            providers,
            fallback,
        }
    }

    /// Candidate `"provider,model"` strings for the context's scenario
    pub fn candidates(&self, ctx: &RequestContext) -> &[String] {
        self.fallback
            .get(&ctx.scenario)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Try each candidate after `error`
    ///
    /// Returns the successful response with the context it ran under. When
    /// every attempt fails the last attempted error is returned, or `error`
    /// itself if no candidate could be attempted.
    pub async fn run(
        &self,
        executor: &PipelineExecutor,
        endpoint: &Arc<dyn Transformer>,
        body: &Value,
        inbound: &HeaderMap,
        ctx: &RequestContext,
        error: GatewayError,
    ) -> GatewayResult<(ProviderResponse, RequestContext)> {
        let candidates = self.candidates(ctx);
        if candidates.is_empty() {
            return Err(error);
        }
        info!(
            "Trying {} fallback candidate(s) for scenario {} [request_id: {}]",
            candidates.len(),
            ctx.scenario,
            ctx.request_id
        );

        let mut last_error = None;
        for candidate in candidates {
            let Some((provider_name, model)) = split_model_ref(candidate) else {
                warn!("Skipping malformed fallback entry '{}'", candidate);
                continue;
            };
            let Some(provider) = self.providers.get(provider_name) else {
                warn!("Fallback provider '{}' not found, skipping", provider_name);
                continue;
            };
            if !provider.is_enabled() {
                warn!("Fallback provider '{}' is disabled, skipping", provider_name);
                continue;
            }

            let attempt = ctx.retarget(provider_name, model);
            let span = info_span!(
                "fallback",
                request_id = %attempt.request_id,
                provider = provider_name,
                model = model
            );
            let mut attempt_body = body.clone();
            if let Some(obj) = attempt_body.as_object_mut() {
                obj.insert("model".to_string(), Value::String(candidate.clone()));
            }

            let result = executor
                .execute(endpoint, &provider, attempt_body, inbound, &attempt)
                .instrument(span)
                .await;
            match result {
                Ok(response) => {
                    info!(
                        "Fallback to {} succeeded [request_id: {}]",
                        candidate, attempt.request_id
                    );
                    return Ok((response, attempt));
                }
                Err(e) => {
                    warn!(
                        "Fallback to {} failed [request_id: {}]: {}",
                        candidate, attempt.request_id, e
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ScenarioType, SecretString, TransformerBindings};
    use crate::http::Dispatch;
    use crate::providers::Provider;
    use crate::transformers::{RequestConfig, ResponseBody, TransformerRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    /// Answers per provider name; unknown names get a 500
    struct Scripted {
        ok: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatch for Scripted {
        async fn dispatch(
            &self,
            provider: &Provider,
            body: Value,
            _config: RequestConfig,
            _ctx: &RequestContext,
        ) -> GatewayResult<ProviderResponse> {
            self.calls.lock().unwrap().push(provider.name().to_string());
            if self.ok.iter().any(|name| *name == provider.name()) {
                Ok(ProviderResponse::json(200, json!({"from": provider.name(), "model": body["model"]})))
            } else {
                Err(GatewayError::ProviderResponse {
                    status: 500,
                    message: format!("{} down", provider.name()),
                })
            }
        }
    }

    fn registry(names: &[&str], disabled: &[&str]) -> Arc<ProviderRegistry> {
        let configs = names.iter().map(|name| ProviderConfig {
            name: name.to_string(),
            base_url: "https://api.example.com/v1/chat/completions".into(),
            api_key: SecretString::new("sk-test"),
            models: vec!["m".into()],
            enabled: !disabled.contains(name),
            transformer: TransformerBindings {
                chain: vec!["openai".into()],
                models: HashMap::new(),
            },
            tokenizer: None,
        });
        Arc::new(
            ProviderRegistry::from_configs(configs, Arc::new(TransformerRegistry::with_builtins()))
                .unwrap(),
        )
    }

    fn setup(
        ok: Vec<&'static str>,
        disabled: &[&str],
        candidates: &[&str],
    ) -> (FallbackCoordinator, PipelineExecutor, Arc<Scripted>) {
        let providers = registry(&["a", "b", "c"], disabled);
        let fallback = HashMap::from([(
            ScenarioType::Think,
            candidates.iter().map(|s| s.to_string()).collect(),
        )]);
        let dispatcher = Arc::new(Scripted {
            ok,
            calls: Mutex::new(Vec::new()),
        });
        (
            FallbackCoordinator::new(providers, fallback),
            PipelineExecutor::new(dispatcher.clone()),
            dispatcher,
        )
    }

    fn context(scenario: ScenarioType) -> RequestContext {
        let mut ctx = RequestContext::new("/v1/chat/completions").with_target("a", "m");
        ctx.scenario = scenario;
        ctx.session_id = Some("s".into());
        ctx
    }

    fn original_error() -> GatewayError {
        GatewayError::ProviderResponse {
            status: 500,
            message: "a down".into(),
        }
    }

    fn endpoint() -> Arc<dyn Transformer> {
        TransformerRegistry::with_builtins().get("openai").unwrap()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_skips_unknown_and_disabled_then_succeeds() {
        let (coordinator, executor, dispatcher) =
            setup(vec!["c"], &["b"], &["missing,m", "b,m", "c,m"]);
        let ctx = context(ScenarioType::Think);
        let (response, used) = coordinator
            .run(&executor, &endpoint(), &json!({"model": "a,m"}), &HeaderMap::new(), &ctx, original_error())
            .await
            .unwrap();

        assert!(matches!(response.body, ResponseBody::Json(v) if v["from"] == "c" && v["model"] == "m"));
        assert_eq!(used.provider, "c");
        assert_eq!(used.scenario, ScenarioType::Think);
        assert_eq!(used.session_id.as_deref(), Some("s"));
        assert_ne!(used.request_id, ctx.request_id);
        assert_eq!(*dispatcher.calls.lock().unwrap(), vec!["c"]);
        assert!(logs_contain("Fallback provider 'missing' not found"));
        assert!(logs_contain("Fallback provider 'b' is disabled"));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let (coordinator, executor, dispatcher) = setup(vec![], &[], &["b,m", "c,m"]);
        let err = coordinator
            .run(&executor, &endpoint(), &json!({}), &HeaderMap::new(), &context(ScenarioType::Think), original_error())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("c down"));
        assert_eq!(*dispatcher.calls.lock().unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_no_candidates_propagates_original() {
        let (coordinator, executor, dispatcher) = setup(vec!["b"], &[], &["b,m"]);
        let err = coordinator
            .run(&executor, &endpoint(), &json!({}), &HeaderMap::new(), &context(ScenarioType::Default), original_error())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("a down"));
        assert!(dispatcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_unattemptable_candidates_propagates_original() {
        let (coordinator, executor, _) = setup(vec![], &[], &["ghost,m", "not-a-ref"]);
        let err = coordinator
            .run(&executor, &endpoint(), &json!({}), &HeaderMap::new(), &context(ScenarioType::Think), original_error())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("a down"));
    }
}
