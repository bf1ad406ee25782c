//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Root configuration for the gateway
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Schema version
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub server: ServerConfig,

    /// Outbound connection settings shared by every provider
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default, alias = "Router")]
    pub router: RouterConfig,

    /// Ordered `"provider,model"` candidates per scenario
    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub tokenizer: TokenizerServiceConfig,

    /// File whose contents replace the preamble of the second system block
    #[serde(default)]
    pub rewrite_system_prompt: Option<PathBuf>,

    /// Directory of per-project session logs used to locate router overrides
    #[serde(default)]
    pub projects_dir: Option<PathBuf>,

    /// Directory holding per-project and per-session router overrides
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            server: ServerConfig::default(),
            connection: ConnectionConfig::default(),
            log: LogConfig::default(),
            providers: Vec::new(),
            router: RouterConfig::default(),
            fallback: FallbackConfig::default(),
            tokenizer: TokenizerServiceConfig::default(),
            rewrite_system_prompt: None,
            projects_dir: None,
            config_dir: None,
        }
    }
}

/// Inbound listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Whole-request deadline for upstream calls, streams included
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_idle", alias = "max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,

    #[serde(default)]
    pub https_proxy: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
            pool_max_idle_per_host: default_max_idle(),
            keepalive_secs: default_keepalive(),
            https_proxy: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// A provider as declared in configuration or registered at runtime
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,

    /// Full endpoint URL requests are POSTed to
    #[serde(alias = "api_base_url", alias = "baseUrl")]
    pub base_url: String,

    #[serde(alias = "apiKey")]
    pub api_key: SecretString,

    #[serde(default)]
    pub models: Vec<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub transformer: TransformerBindings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<ProviderTokenizerConfig>,
}

/// Transformer names bound to a provider: a global chain plus per-model chains
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TransformerBindings {
    #[serde(default, rename = "use")]
    pub chain: Vec<String>,

    /// Keyed by exact model string
    #[serde(flatten)]
    pub models: HashMap<String, ModelTransformers>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ModelTransformers {
    #[serde(default, rename = "use")]
    pub chain: Vec<String>,
}

/// Per-provider tokenizer selection
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProviderTokenizerConfig {
    #[serde(default)]
    pub default: Option<TokenizerConfig>,
    #[serde(default)]
    pub models: HashMap<String, TokenizerConfig>,
}

/// Which backend counts tokens, and how to reach it
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenizerConfig {
    Tiktoken {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
    },
    Huggingface {
        model: String,
    },
    Api {
        #[serde(default)]
        url: Option<String>,
        #[serde(default, alias = "apiKey")]
        api_key: Option<SecretString>,
        #[serde(default, alias = "requestFormat")]
        request_format: RequestFormat,
        #[serde(default, alias = "responseField")]
        response_field: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

/// Body shape POSTed to a remote token-counting API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestFormat {
    #[default]
    Standard,
    Openai,
    Anthropic,
    Custom,
}

/// Routing category that drives model selection and fallback lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScenarioType {
    #[default]
    Default,
    Background,
    Think,
    #[serde(alias = "long_context")]
    LongContext,
    #[serde(alias = "web_search")]
    WebSearch,
}

impl ScenarioType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Background => "background",
            Self::Think => "think",
            Self::LongContext => "longContext",
            Self::WebSearch => "webSearch",
        }
    }
}

impl fmt::Display for ScenarioType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type FallbackConfig = HashMap<ScenarioType, Vec<String>>;

/// Scenario-to-model mapping, each entry a `"provider,model"` string
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub think: Option<String>,
    #[serde(default, alias = "longContext")]
    pub long_context: Option<String>,
    #[serde(default = "default_long_context_threshold", alias = "longContextThreshold")]
    pub long_context_threshold: u64,
    #[serde(default, alias = "webSearch")]
    pub web_search: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default: None,
            background: None,
            think: None,
            long_context: None,
            long_context_threshold: default_long_context_threshold(),
            web_search: None,
        }
    }
}

impl RouterConfig {
    /// Configured model for a scenario
    pub fn model_for(&self, scenario: ScenarioType) -> Option<&str> {
        match scenario {
            ScenarioType::Default => self.default.as_deref(),
            ScenarioType::Background => self.background.as_deref(),
            ScenarioType::Think => self.think.as_deref(),
            ScenarioType::LongContext => self.long_context.as_deref(),
            ScenarioType::WebSearch => self.web_search.as_deref(),
        }
    }

    fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("default", self.default.as_deref()),
            ("background", self.background.as_deref()),
            ("think", self.think.as_deref()),
            ("long_context", self.long_context.as_deref()),
            ("web_search", self.web_search.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
    }
}

/// Tokenizer service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TokenizerServiceConfig {
    /// Deadline for tokenizer asset downloads and remote counting calls
    #[serde(default = "default_tokenizer_timeout")]
    pub timeout_ms: u64,

    /// Root of the HuggingFace asset cache; `~/.switchyard/.huggingface` when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_hub_endpoint")]
    pub hub_endpoint: String,
}

impl Default for TokenizerServiceConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_tokenizer_timeout(),
            cache_dir: None,
            hub_endpoint: default_hub_endpoint(),
        }
    }
}

fn default_version() -> String { "0.1".to_string() }
fn default_true() -> bool { true }
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 3456 }
fn default_connect_timeout() -> u64 { 10_000 }
fn default_request_timeout() -> u64 { 600_000 }
fn default_max_idle() -> usize { 10 }
fn default_keepalive() -> u64 { 90 }
fn default_log_level() -> String { "info".to_string() }
fn default_long_context_threshold() -> u64 { 60_000 }
fn default_tokenizer_timeout() -> u64 { 30_000 }
fn default_hub_endpoint() -> String { "https://huggingface.co".to_string() }

/// Split a `"provider,model"` reference; the model keeps any further commas
pub fn split_model_ref(value: &str) -> Option<(&str, &str)> {
    let (provider, model) = value.split_once(',')?;
    if provider.trim().is_empty() || model.trim().is_empty() {
        return None;
    }
    Some((provider, model))
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version != "0.1" {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::UnsupportedVersion {
                    found: self.version.clone(),
                },
            ));
        }

        let mut seen_names = HashSet::new();
        for (i, provider) in self.providers.iter().enumerate() {
            if !seen_names.insert(provider.name.as_str()) {
                return Err(ValidationError::new(
                    format!("providers[{}].name", i),
                    ValidationErrorKind::DuplicateProvider {
                        name: provider.name.clone(),
                    },
                ));
            }
            provider.validate(&format!("providers[{}]", i))?;
        }

        for (field, entry) in self.router.entries() {
            let path = format!("router.{}", field);
            let (provider, _) = split_model_ref(entry).ok_or_else(|| {
                ValidationError::invalid_format(&path, "expected \"provider,model\"")
            })?;
            if !self.providers.iter().any(|p| p.name == provider) {
                return Err(ValidationError::unknown_provider(path, provider));
            }
        }

        for (scenario, candidates) in &self.fallback {
            for (i, candidate) in candidates.iter().enumerate() {
                if split_model_ref(candidate).is_none() {
                    return Err(ValidationError::invalid_format(
                        format!("fallback.{}[{}]", scenario, i),
                        "expected \"provider,model\"",
                    ));
                }
            }
        }

        Ok(())
    }
}

impl ProviderConfig {
    /// Validate provider configuration; `path` prefixes reported field paths
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.name", path)));
        }

        if self.api_key.is_empty() {
            return Err(ValidationError::required(format!("{}.api_key", path)));
        }

        if self.base_url.trim().is_empty() {
            return Err(ValidationError::required(format!("{}.base_url", path)));
        }

        match url::Url::parse(&self.base_url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => {
                return Err(ValidationError::invalid_url(
                    format!("{}.base_url", path),
                    format!("unsupported scheme '{}'", url.scheme()),
                ))
            }
            Err(e) => {
                return Err(ValidationError::invalid_url(
                    format!("{}.base_url", path),
                    e.to_string(),
                ))
            }
        }

        if self.models.is_empty() {
            return Err(ValidationError::required(format!("{}.models", path))
                .with_hint("At least one model must be listed"));
        }

        if let Some(tokenizer) = &self.tokenizer {
            let configs = tokenizer
                .default
                .iter()
                .map(|c| ("default".to_string(), c))
                .chain(tokenizer.models.iter().map(|(m, c)| (format!("models.{}", m), c)));
            for (key, config) in configs {
                if let TokenizerConfig::Api { url, api_key, .. } = config {
                    let field = format!("{}.tokenizer.{}", path, key);
                    if url.as_deref().map_or(true, str::is_empty) {
                        return Err(ValidationError::required(format!("{}.url", field)));
                    }
                    if api_key.as_ref().map_or(true, SecretString::is_empty) {
                        return Err(ValidationError::required(format!("{}.api_key", field)));
                    }
                }
            }
        }

        Ok(())
    }
}
