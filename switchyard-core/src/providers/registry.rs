use super::Provider;
use crate::config::{
    ProviderConfig, ProviderTokenizerConfig, SecretString, TransformerBindings,
};
use crate::error::{GatewayError, GatewayResult};
use crate::transformers::TransformerRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Partial provider update; absent fields keep their current value
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderUpdate {
    #[serde(default, alias = "api_base_url")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub transformer: Option<TransformerBindings>,
    #[serde(default)]
    pub tokenizer: Option<ProviderTokenizerConfig>,
}

impl ProviderUpdate {
    fn apply(self, config: &mut ProviderConfig) {
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(api_key) = self.api_key {
            config.api_key = api_key;
        }
        if let Some(models) = self.models {
            config.models = models;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(transformer) = self.transformer {
            config.transformer = transformer;
        }
        if let Some(tokenizer) = self.tokenizer {
            config.tokenizer = Some(tokenizer);
        }
    }
}

/// Provider view returned by the management API, key partially redacted
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub base_url: String,
    pub api_key: String,
    pub models: Vec<String>,
    pub enabled: bool,
    pub transformer: TransformerBindings,
}

impl From<&Provider> for ProviderInfo {
    fn from(provider: &Provider) -> Self {
        let config = provider.config();
        Self {
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.partial_redact(),
            models: config.models.clone(),
            enabled: config.enabled,
            transformer: config.transformer.clone(),
        }
    }
}

/// Name-keyed provider store shared by the router, pipelines and API
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<Provider>>>,
    transformers: Arc<TransformerRegistry>,
}

impl ProviderRegistry {
    pub fn new(transformers: Arc<TransformerRegistry>) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            transformers,
        }
    }

    /// Registry holding every configured provider
    pub fn from_configs(
        configs: impl IntoIterator<Item = ProviderConfig>,
        transformers: Arc<TransformerRegistry>,
    ) -> GatewayResult<Self> {
        let registry = Self::new(transformers);
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    pub fn transformers(&self) -> &Arc<TransformerRegistry> {
        &self.transformers
    }

    fn build(&self, config: ProviderConfig) -> GatewayResult<Provider> {
        config
            .validate("provider")
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        Provider::from_config(config, &self.transformers)
    }

    pub fn register(&self, config: ProviderConfig) -> GatewayResult<Arc<Provider>> {
        let provider = Arc::new(self.build(config)?);
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if providers.contains_key(provider.name()) {
            return Err(GatewayError::ProviderExists(provider.name().to_string()));
        }
        info!(
            "Registered provider '{}' with {} model(s)",
            provider.name(),
            provider.models().len()
        );
        providers.insert(provider.name().to_string(), provider.clone());
        Ok(provider)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn find_case_insensitive(&self, name: &str) -> Option<Arc<Provider>> {
        if let Some(provider) = self.get(name) {
            return Some(provider);
        }
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Every provider, sorted by name
    pub fn list(&self) -> Vec<Arc<Provider>> {
        let mut providers: Vec<_> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.name().cmp(b.name()));
        providers
    }

    pub fn update(&self, name: &str, update: ProviderUpdate) -> GatewayResult<Arc<Provider>> {
        let current = self
            .get(name)
            .ok_or_else(|| GatewayError::ProviderNotFound(name.to_string()))?;
        let mut config = current.config().clone();
        update.apply(&mut config);
        let provider = Arc::new(self.build(config)?);

        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if !providers.contains_key(name) {
            return Err(GatewayError::ProviderNotFound(name.to_string()));
        }
        providers.insert(name.to_string(), provider.clone());
        info!("Updated provider '{}'", name);
        Ok(provider)
    }

    pub fn remove(&self, name: &str) -> GatewayResult<Arc<Provider>> {
        let removed = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| GatewayError::ProviderNotFound(name.to_string()))?;
        info!("Removed provider '{}'", name);
        Ok(removed)
    }

    pub fn toggle(&self, name: &str, enabled: bool) -> GatewayResult<Arc<Provider>> {
        self.update(
            name,
            ProviderUpdate {
                enabled: Some(enabled),
                ..Default::default()
            },
        )
    }

    /// Resolve `provider,model` case-insensitively to canonical names
    ///
    /// Only enabled providers resolve, and only for models they declare.
    pub fn resolve_model(&self, provider: &str, model: &str) -> Option<(Arc<Provider>, String)> {
        let provider = self.find_case_insensitive(provider.trim())?;
        if !provider.is_enabled() {
            return None;
        }
        let model = provider.find_model(model.trim())?.to_string();
        Some((provider, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new(Arc::new(TransformerRegistry::with_builtins()))
    }

    fn config(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            base_url: "https://api.example.com/v1/chat/completions".to_string(),
            api_key: SecretString::new("sk-0123456789abcdef"),
            models: vec!["Model-A".to_string()],
            enabled: true,
            transformer: TransformerBindings {
                chain: vec!["openai".to_string()],
                models: HashMap::new(),
            },
            tokenizer: None,
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let registry = registry();
        registry.register(config("p")).unwrap();
        let err = registry.register(config("p")).unwrap_err();
        assert!(matches!(err, GatewayError::ProviderExists(name) if name == "p"));
    }

    #[test]
    fn test_register_validates() {
        let mut bad = config("p");
        bad.base_url = "ftp://nope".to_string();
        let err = registry().register(bad).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_update_is_partial() {
        let registry = registry();
        registry.register(config("p")).unwrap();
        let updated = registry
            .update(
                "p",
                ProviderUpdate {
                    models: Some(vec!["m2".to_string()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.models(), ["m2".to_string()]);
        assert_eq!(updated.base_url(), "https://api.example.com/v1/chat/completions");

        let err = registry.update("missing", ProviderUpdate::default()).unwrap_err();
        assert!(matches!(err, GatewayError::ProviderNotFound(_)));
    }

    #[test]
    fn test_toggle_and_resolve() {
        let registry = registry();
        registry.register(config("OpenRouter")).unwrap();

        let (provider, model) = registry.resolve_model("openrouter", "model-a").unwrap();
        assert_eq!(provider.name(), "OpenRouter");
        assert_eq!(model, "Model-A");
        assert!(registry.resolve_model("openrouter", "unknown").is_none());

        registry.toggle("OpenRouter", false).unwrap();
        assert!(registry.resolve_model("openrouter", "model-a").is_none());
        assert!(!registry.get("OpenRouter").unwrap().is_enabled());
    }

    #[test]
    fn test_remove_and_list() {
        let registry = registry();
        registry.register(config("b")).unwrap();
        registry.register(config("a")).unwrap();
        let names: Vec<_> = registry.list().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, ["a", "b"]);

        registry.remove("a").unwrap();
        assert!(registry.get("a").is_none());
        assert!(registry.remove("a").is_err());
    }

    #[test]
    fn test_info_redacts_key() {
        let registry = registry();
        let provider = registry.register(config("p")).unwrap();
        let info = ProviderInfo::from(provider.as_ref());
        assert_eq!(info.api_key, "sk-...cdef");
    }
}
