//! Upstream providers and their registry
//!
//! A [`Provider`] is a configured upstream plus its resolved transformer
//! chains. The [`ProviderRegistry`] owns every provider and supports runtime
//! CRUD; readers take an `Arc<Provider>` snapshot so updates never disturb a
//! request already in flight.

mod registry;

pub use registry::{ProviderInfo, ProviderRegistry, ProviderUpdate};

use crate::config::{ProviderConfig, SecretString, TokenizerConfig};
use crate::error::{GatewayError, GatewayResult};
use crate::transformers::{Transformer, TransformerRegistry};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A configured upstream with its transformer chains resolved
#[derive(Clone)]
pub struct Provider {
    config: ProviderConfig,
    chain: Vec<Arc<dyn Transformer>>,
    model_chains: HashMap<String, Vec<Arc<dyn Transformer>>>,
}

impl Provider {
    /// Resolve `config`'s transformer names against `transformers`
    pub fn from_config(
        config: ProviderConfig,
        transformers: &TransformerRegistry,
    ) -> GatewayResult<Self> {
        let resolve = |names: &[String]| -> GatewayResult<Vec<Arc<dyn Transformer>>> {
            names
                .iter()
                .map(|name| {
                    transformers.get(name).ok_or_else(|| {
                        GatewayError::InvalidRequest(format!(
                            "Provider '{}' uses unknown transformer '{}'",
                            config.name, name
                        ))
                    })
                })
                .collect()
        };

        let chain = resolve(&config.transformer.chain)?;
        let model_chains = config
            .transformer
            .models
            .iter()
            .map(|(model, bindings)| Ok((model.clone(), resolve(&bindings.chain)?)))
            .collect::<GatewayResult<HashMap<_, _>>>()?;

        Ok(Self {
            config,
            chain,
            model_chains,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.config.api_key
    }

    pub fn models(&self) -> &[String] {
        &self.config.models
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Provider-level transformers in registration order
    pub fn transformer_chain(&self) -> &[Arc<dyn Transformer>] {
        &self.chain
    }

    /// Transformers bound to one exact model string
    pub fn model_chain(&self, model: &str) -> &[Arc<dyn Transformer>] {
        self.model_chains.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Configured names of the provider-level chain
    pub fn chain_names(&self) -> &[String] {
        &self.config.transformer.chain
    }

    /// Case-insensitive match against the declared models, returning the canonical name
    pub fn find_model(&self, model: &str) -> Option<&str> {
        self.config
            .models
            .iter()
            .find(|m| m.eq_ignore_ascii_case(model))
            .map(String::as_str)
    }

    /// Tokenizer for a model: the model entry first, then the provider default
    pub fn tokenizer_config_for(&self, model: &str) -> Option<&TokenizerConfig> {
        let tokenizer = self.config.tokenizer.as_ref()?;
        tokenizer.models.get(model).or(tokenizer.default.as_ref())
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.config.name)
            .field("base_url", &self.config.base_url)
            .field("models", &self.config.models)
            .field("enabled", &self.config.enabled)
            .field("chain", &self.config.transformer.chain)
            .finish()
    }
}

/// Provider named `name` serving model `m` with the given global chain
#[cfg(test)]
pub(crate) fn test_provider(name: &str, chain: &[&str]) -> Provider {
    use crate::config::TransformerBindings;

    let config = ProviderConfig {
        name: name.to_string(),
        base_url: "https://api.example.com/v1/chat/completions".to_string(),
        api_key: SecretString::new("sk-test"),
        models: vec!["m".to_string()],
        enabled: true,
        transformer: TransformerBindings {
            chain: chain.iter().map(|s| s.to_string()).collect(),
            models: HashMap::new(),
        },
        tokenizer: None,
    };
    Provider::from_config(config, &TransformerRegistry::with_builtins()).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelTransformers, ProviderTokenizerConfig, TransformerBindings};

    fn config() -> ProviderConfig {
        ProviderConfig {
            name: "deepseek".to_string(),
            base_url: "https://api.deepseek.com/chat/completions".to_string(),
            api_key: SecretString::new("sk-test"),
            models: vec!["deepseek-chat".to_string(), "deepseek-reasoner".to_string()],
            enabled: true,
            transformer: TransformerBindings {
                chain: vec!["openai".to_string()],
                models: HashMap::from([(
                    "deepseek-chat".to_string(),
                    ModelTransformers {
                        chain: vec!["forcereasoning".to_string()],
                    },
                )]),
            },
            tokenizer: None,
        }
    }

    #[test]
    fn test_chains_resolve() {
        let provider = Provider::from_config(config(), &TransformerRegistry::with_builtins()).unwrap();
        assert_eq!(provider.transformer_chain().len(), 1);
        assert_eq!(provider.model_chain("deepseek-chat")[0].name(), "forcereasoning");
        assert!(provider.model_chain("deepseek-reasoner").is_empty());
        assert_eq!(provider.find_model("DeepSeek-Chat"), Some("deepseek-chat"));
    }

    #[test]
    fn test_unknown_transformer_rejected() {
        let mut config = config();
        config.transformer.chain.push("nope".to_string());
        let err = Provider::from_config(config, &TransformerRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(msg) if msg.contains("nope")));
    }

    #[test]
    fn test_tokenizer_model_entry_wins() {
        let mut config = config();
        config.tokenizer = Some(ProviderTokenizerConfig {
            default: Some(TokenizerConfig::Tiktoken { encoding: None }),
            models: HashMap::from([(
                "deepseek-chat".to_string(),
                TokenizerConfig::Huggingface {
                    model: "deepseek-ai/DeepSeek-V3".to_string(),
                },
            )]),
        });
        let provider = Provider::from_config(config, &TransformerRegistry::with_builtins()).unwrap();
        assert!(matches!(
            provider.tokenizer_config_for("deepseek-chat"),
            Some(TokenizerConfig::Huggingface { .. })
        ));
        assert!(matches!(
            provider.tokenizer_config_for("other"),
            Some(TokenizerConfig::Tiktoken { .. })
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let provider = Provider::from_config(config(), &TransformerRegistry::with_builtins()).unwrap();
        assert!(!format!("{:?}", provider).contains("sk-test"));
    }
}
