//! Read-only accessor over the loaded configuration

use super::schema::GatewayConfig;
use super::secrets::redact_value;
use serde_json::Value;
use std::sync::Arc;

/// Shared view of the gateway configuration
///
/// `get`/`get_all` serve collaborators that address settings by key, such as
/// custom router hooks. Credentials are redacted from these views; typed
/// access through [`ConfigService::config`] is unredacted.
#[derive(Debug, Clone)]
pub struct ConfigService {
    config: Arc<GatewayConfig>,
    snapshot: Arc<Value>,
}

impl ConfigService {
    pub fn new(config: GatewayConfig) -> Self {
        let mut snapshot = serde_json::to_value(&config).unwrap_or(Value::Null);
        redact_value(&mut snapshot);
        Self {
            config: Arc::new(config),
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Look up a value by dot path, e.g. `router.default` or `providers.0.name`
    pub fn get(&self, key: &str) -> Option<Value> {
        lookup_path(&self.snapshot, key).cloned()
    }

    pub fn get_all(&self) -> Value {
        self.snapshot.as_ref().clone()
    }
}

/// Walk a dot-separated path through objects and arrays
pub(crate) fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ProviderConfig, RouterConfig, TransformerBindings};
    use crate::config::SecretString;
    use serde_json::json;

    fn service() -> ConfigService {
        ConfigService::new(GatewayConfig {
            providers: vec![ProviderConfig {
                name: "p".to_string(),
                base_url: "https://example.com/v1".to_string(),
                api_key: SecretString::new("sk-secret"),
                models: vec!["m".to_string()],
                enabled: true,
                transformer: TransformerBindings::default(),
                tokenizer: None,
            }],
            router: RouterConfig {
                default: Some("p,m".to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_get_by_dot_path() {
        let svc = service();
        assert_eq!(svc.get("router.default"), Some(json!("p,m")));
        assert_eq!(svc.get("providers.0.name"), Some(json!("p")));
        assert_eq!(svc.get("router.missing"), None);
    }

    #[test]
    fn test_snapshot_redacts_keys() {
        let svc = service();
        assert_eq!(svc.get("providers.0.api_key"), Some(json!("[REDACTED]")));
        assert_eq!(svc.config().providers[0].api_key.expose_secret(), "sk-secret");
    }
}
