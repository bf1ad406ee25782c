//! Per-request model selection
//!
//! [`Router::route`] picks the `"provider,model"` a request is sent to. A
//! custom hook gets the first word; after that the built-in rules run in
//! priority order:
//!
//! 1. an explicit `provider,model` in the body
//! 2. long context, including sticky escalation from the previous turn
//! 3. a subagent model tag in the second system block
//! 4. Claude Haiku requests to the background model
//! 5. web search tools
//! 6. extended thinking
//! 7. the default model
//!
//! Routing never fails a request. Errors are logged and the global default
//! model is used.

mod overrides;
mod session;

pub use overrides::{CustomRouter, ProjectRouterOverrides, RouterOverrides};
pub use session::{
    parse_session_id, session_id_of, SessionUsageCache, Usage, DEFAULT_SESSION_CAPACITY,
    SESSION_MARKER,
};

use crate::config::{split_model_ref, ConfigService, RouterConfig, ScenarioType};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{MessagesRequest, TokenizeRequest};
use crate::providers::ProviderRegistry;
use crate::tokenizer::TokenizerService;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, warn};

/// Secondary cutoff for sticky long-context escalation
pub const STICKY_LONG_CONTEXT_TOKENS: usize = 20_000;

const ENV_MARKER: &str = "<env>";

static SUBAGENT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<CCR-SUBAGENT-MODEL>(.*?)</CCR-SUBAGENT-MODEL>")
        .expect("valid subagent tag pattern")
});

/// What routing decided for a request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouterContext {
    pub session_id: Option<String>,
    pub scenario: ScenarioType,
    pub token_count: usize,
}

struct Selection {
    model: Option<String>,
    scenario: ScenarioType,
    token_count: usize,
}

pub struct Router {
    config: ConfigService,
    providers: Arc<ProviderRegistry>,
    tokenizers: Arc<TokenizerService>,
    usage: Arc<SessionUsageCache>,
    overrides: Option<Arc<dyn RouterOverrides>>,
    custom: Option<Arc<dyn CustomRouter>>,
}

impl Router {
    /// Router over the given services; project overrides are enabled when
    /// both `projects_dir` and `config_dir` are configured
    pub fn new(
        config: ConfigService,
        providers: Arc<ProviderRegistry>,
        tokenizers: Arc<TokenizerService>,
        usage: Arc<SessionUsageCache>,
    ) -> Self {
        let overrides = match (&config.config().projects_dir, &config.config().config_dir) {
            (Some(projects), Some(configs)) => Some(Arc::new(ProjectRouterOverrides::new(
                projects.clone(),
                configs.clone(),
            )) as Arc<dyn RouterOverrides>),
            _ => None,
        };
        Self {
            config,
            providers,
            tokenizers,
            usage,
            overrides,
            custom: None,
        }
    }

    pub fn with_overrides(mut self, overrides: Arc<dyn RouterOverrides>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_custom_router(mut self, custom: Arc<dyn CustomRouter>) -> Self {
        self.custom = Some(custom);
        self
    }

    pub fn usage(&self) -> &Arc<SessionUsageCache> {
        &self.usage
    }

    /// Choose the target model and write it into `body.model`
    pub async fn route(&self, body: &mut Value) -> RouterContext {
        let session_id = session_id_of(body);
        self.rewrite_system_prompt(body).await;

        let selection = match self.select(body, session_id.as_deref()).await {
            Ok(selection) => selection,
            Err(e) => {
                warn!("Router failed, using default model: {}", e);
                Selection {
                    model: self.config.config().router.default.clone(),
                    scenario: ScenarioType::Default,
                    token_count: 0,
                }
            }
        };

        if let Some(model) = selection.model {
            debug!(
                "Routed to '{}' (scenario: {}, tokens: {})",
                model, selection.scenario, selection.token_count
            );
            if let Some(obj) = body.as_object_mut() {
                obj.insert("model".to_string(), Value::String(model));
            }
        }

        RouterContext {
            session_id,
            scenario: selection.scenario,
            token_count: selection.token_count,
        }
    }

    async fn select(&self, body: &mut Value, session_id: Option<&str>) -> GatewayResult<Selection> {
        let request: MessagesRequest = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::InvalidRequest(format!("Unroutable body: {}", e)))?;
        let token_count = self.count_tokens(&request).await;

        if let Some(custom) = &self.custom {
            match custom
                .route(&request, token_count, &self.config.get_all())
                .await
            {
                Ok(Some(model)) => {
                    return Ok(Selection {
                        model: Some(model),
                        scenario: ScenarioType::Default,
                        token_count,
                    })
                }
                Ok(None) => {}
                Err(e) => error!("Custom router failed, using built-in rules: {}", e),
            }
        }

        let router = self.router_config(session_id).await;
        let last_usage = session_id.and_then(|s| self.usage.get(s));
        let (model, scenario) = self.apply_rules(body, &request, &router, token_count, last_usage);
        Ok(Selection {
            model,
            scenario,
            token_count,
        })
    }

    fn apply_rules(
        &self,
        body: &mut Value,
        request: &MessagesRequest,
        router: &RouterConfig,
        token_count: usize,
        last_usage: Option<Usage>,
    ) -> (Option<String>, ScenarioType) {
        if request.model.contains(',') {
            let model = match split_model_ref(&request.model)
                .and_then(|(p, m)| self.providers.resolve_model(p, m))
            {
                Some((provider, model)) => format!("{},{}", provider.name(), model),
                None => request.model.clone(),
            };
            return (Some(model), ScenarioType::Default);
        }

        if let Some(model) = router.long_context.as_deref() {
            if exceeds_long_context(router.long_context_threshold, token_count, last_usage) {
                debug!("Using long context model for {} tokens", token_count);
                return (Some(model.to_string()), ScenarioType::LongContext);
            }
        }

        if let Some(model) = take_subagent_model(body) {
            return (Some(model), ScenarioType::Default);
        }

        let scenario = heuristic_scenario(request, router).unwrap_or_default();
        let model = router
            .model_for(scenario)
            .or(router.default.as_deref())
            .map(str::to_string);
        (model, scenario)
    }

    /// Session or project router config, else the global one
    async fn router_config(&self, session_id: Option<&str>) -> RouterConfig {
        if let (Some(overrides), Some(session)) = (&self.overrides, session_id) {
            if let Some(router) = overrides.router_for(session).await {
                return router;
            }
        }
        self.config.config().router.clone()
    }

    /// Count with the tokenizer of the provider named in the request
    async fn count_tokens(&self, request: &MessagesRequest) -> usize {
        let provider = split_model_ref(&request.model)
            .and_then(|(p, m)| self.providers.resolve_model(p, m));
        let config = provider
            .as_ref()
            .and_then(|(provider, model)| provider.tokenizer_config_for(model));
        self.tokenizers
            .count_tokens(&TokenizeRequest::from(request), config)
            .await
            .token_count
    }

    async fn rewrite_system_prompt(&self, body: &mut Value) {
        let Some(path) = &self.config.config().rewrite_system_prompt else {
            return;
        };
        let Some(text) = body
            .pointer_mut("/system/1/text")
            .filter(|t| t.as_str().is_some_and(|s| s.contains(ENV_MARKER)))
        else {
            return;
        };
        let prompt = match tokio::fs::read_to_string(path).await {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!("Cannot read system prompt {}: {}", path.display(), e);
                return;
            }
        };
        let tail = text
            .as_str()
            .and_then(|s| s.rsplit(ENV_MARKER).next())
            .unwrap_or_default()
            .to_string();
        *text = Value::String(format!("{}{}{}", prompt, ENV_MARKER, tail));
    }
}

fn exceeds_long_context(threshold: u64, token_count: usize, last_usage: Option<Usage>) -> bool {
    let threshold = threshold as usize;
    let sticky = last_usage.is_some_and(|u| {
        u.input_tokens as usize > threshold && token_count > STICKY_LONG_CONTEXT_TOKENS
    });
    token_count > threshold || sticky
}

/// Extract the subagent model and strip its tag from `system[1].text`
fn take_subagent_model(body: &mut Value) -> Option<String> {
    let text = body.pointer_mut("/system/1/text")?;
    let current = text.as_str()?;
    let captures = SUBAGENT_TAG.captures(current)?;
    let model = captures.get(1)?.as_str().to_string();
    let stripped = SUBAGENT_TAG.replace(current, "").into_owned();
    *text = Value::String(stripped);
    Some(model)
}

/// Rules 4 to 6; each applies only when its model is configured
fn heuristic_scenario(request: &MessagesRequest, router: &RouterConfig) -> Option<ScenarioType> {
    let model = request.model.to_ascii_lowercase();
    if router.background.is_some() && model.contains("claude") && model.contains("haiku") {
        return Some(ScenarioType::Background);
    }
    if router.web_search.is_some() && has_web_search_tool(request) {
        return Some(ScenarioType::WebSearch);
    }
    if router.think.is_some() && request.wants_thinking() {
        return Some(ScenarioType::Think);
    }
    None
}

fn has_web_search_tool(request: &MessagesRequest) -> bool {
    request.tools.iter().flatten().any(|tool| {
        tool.name.starts_with("web_search")
            || tool
                .kind
                .as_deref()
                .is_some_and(|k| k.starts_with("web_search"))
    })
}
