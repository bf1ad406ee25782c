//! Name-keyed transformer lookup

use super::{
    AnthropicTransformer, CerebrasTransformer, ForceReasoningTransformer, OpenAIResponsesTransformer,
    OpenAITransformer, Transformer,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Listing entry for `GET /api/transformers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformerInfo {
    pub name: String,
    pub endpoint: Option<String>,
}

/// Registry of transformers, populated at startup and read-only afterwards
#[derive(Default)]
pub struct TransformerRegistry {
    transformers: HashMap<String, Arc<dyn Transformer>>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in transformer
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(AnthropicTransformer::new()));
        registry.register(Arc::new(OpenAITransformer::new()));
        registry.register(Arc::new(OpenAIResponsesTransformer::new()));
        registry.register(Arc::new(ForceReasoningTransformer::new()));
        registry.register(Arc::new(CerebrasTransformer::new()));
        registry
    }

    /// Add a transformer, replacing any existing one with the same name
    pub fn register(&mut self, transformer: Arc<dyn Transformer>) {
        let name = transformer.name().to_string();
        if self.transformers.insert(name.clone(), transformer).is_some() {
            warn!("Transformer '{}' replaced by a later registration", name);
        } else {
            debug!("Registered transformer '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transformers.contains_key(name)
    }

    /// All transformers, sorted by name
    pub fn list(&self) -> Vec<TransformerInfo> {
        let mut infos: Vec<_> = self
            .transformers
            .values()
            .map(|t| TransformerInfo {
                name: t.name().to_string(),
                endpoint: t.endpoint().map(str::to_owned),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Transformers that serve an inbound route, keyed by that route
    pub fn endpoints(&self) -> Vec<(String, Arc<dyn Transformer>)> {
        let mut routes: Vec<_> = self
            .transformers
            .values()
            .filter_map(|t| t.endpoint().map(|e| (e.to_string(), Arc::clone(t))))
            .collect();
        routes.sort_by(|a, b| a.0.cmp(&b.0));
        routes
    }

    /// Endpoint transformer serving `route`
    pub fn for_endpoint(&self, route: &str) -> Option<Arc<dyn Transformer>> {
        self.transformers
            .values()
            .find(|t| t.endpoint() == Some(route))
            .cloned()
    }
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.transformers.keys().collect();
        names.sort();
        f.debug_struct("TransformerRegistry")
            .field("transformers", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_and_endpoints() {
        let registry = TransformerRegistry::with_builtins();
        let names: Vec<_> = registry.list().into_iter().map(|i| i.name).collect();
        assert_eq!(
            names,
            ["anthropic", "cerebras", "forcereasoning", "openai", "openai-responses"]
        );

        let routes: Vec<_> = registry.endpoints().into_iter().map(|(r, _)| r).collect();
        assert_eq!(routes, vec!["/v1/chat/completions", "/v1/messages", "/v1/responses"]);
        assert_eq!(
            registry.for_endpoint("/v1/messages").map(|t| t.name().to_string()),
            Some("anthropic".to_string())
        );
        assert!(registry.get("missing").is_none());
    }
}
