//! Gateway configuration
//!
//! Loading interpolates `${VAR}` references from the environment, parses YAML
//! or JSON into [`GatewayConfig`], and runs [`ConfigValidator`]. The
//! [`ConfigService`] exposes the loaded configuration to collaborators through
//! key lookups.

mod env;
mod error;
mod schema;
mod secrets;
mod service;
mod validator;

pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    split_model_ref, ConnectionConfig, FallbackConfig, GatewayConfig, LogConfig, ModelTransformers,
    ProviderConfig, ProviderTokenizerConfig, RequestFormat, RouterConfig, ScenarioType,
    ServerConfig, TokenizerConfig, TokenizerServiceConfig, TransformerBindings,
};
pub use secrets::{is_sensitive_field, redact_value, SecretString};
pub use service::ConfigService;
pub(crate) use service::lookup_path;
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

/// On-disk configuration syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Guess the format from a file extension; anything but `.json` is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    load_from_path(path.as_ref(), ConfigFormat::Yaml)
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    load_from_path(path.as_ref(), ConfigFormat::Json)
}

/// Load a configuration file, picking the parser from its extension
pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<GatewayConfig> {
    let path = path.as_ref();
    load_from_path(path, ConfigFormat::from_path(path))
}

fn load_from_path(path: &Path, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    parse(&content, format, &path.to_string_lossy())
}

/// Parse configuration text that did not come from a file
pub fn load_from_str(content: &str, format: ConfigFormat) -> ConfigResult<GatewayConfig> {
    parse(content, format, "<inline>")
}

fn parse(content: &str, format: ConfigFormat, origin: &str) -> ConfigResult<GatewayConfig> {
    let interpolated = env::interpolate_env_vars(content)?;

    let config: GatewayConfig = match format {
        ConfigFormat::Yaml => {
            serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
                path: origin.to_string(),
                line: e.location().map(|l| l.line()),
                column: e.location().map(|l| l.column()),
                message: e.to_string(),
            })?
        }
        ConfigFormat::Json => {
            serde_json::from_str(&interpolated).map_err(|e| ConfigError::ParseError {
                path: origin.to_string(),
                line: Some(e.line()),
                column: Some(e.column()),
                message: e.to_string(),
            })?
        }
    };

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_yaml() {
        let yaml = r#"
providers:
  - name: deepseek
    base_url: https://api.deepseek.com/chat/completions
    api_key: sk-test
    models: [deepseek-chat, deepseek-reasoner]
    transformer:
      use: [openai]
      deepseek-reasoner:
        use: [forcereasoning]
router:
  default: deepseek,deepseek-chat
  think: deepseek,deepseek-reasoner
fallback:
  default: ["deepseek,deepseek-reasoner"]
"#;
        let config = load_from_str(yaml, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].models.len(), 2);
        assert_eq!(
            config.providers[0].transformer.models["deepseek-reasoner"].chain,
            vec!["forcereasoning"]
        );
        assert_eq!(config.router.think.as_deref(), Some("deepseek,deepseek-reasoner"));
        assert_eq!(config.fallback[&ScenarioType::Default].len(), 1);
        assert_eq!(config.server.port, 3456);
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let result = load_from_str("unexpected: true\n", ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a/config.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("config.yml")), ConfigFormat::Yaml);
    }
}
