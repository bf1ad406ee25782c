//! Configuration validation beyond per-field schema checks

use super::env::has_env_reference;
use super::error::ValidationError;
use super::schema::{split_model_ref, GatewayConfig};
use tracing::warn;

/// Validator applied after parsing and interpolation
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Reject configs whose router has no default model
    require_default_route: bool,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also require `router.default` to be set
    pub fn strict(mut self) -> Self {
        self.require_default_route = true;
        self
    }

    pub fn validate(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_secrets(config)?;
        self.validate_default_route(config)?;
        self.check_fallback_references(config);

        Ok(())
    }

    fn validate_secrets(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        for (i, provider) in config.providers.iter().enumerate() {
            if has_env_reference(provider.api_key.expose_secret()) {
                return Err(ValidationError::invalid_format(
                    format!("providers[{}].api_key", i),
                    "unresolved environment reference",
                ));
            }
        }
        Ok(())
    }

    fn validate_default_route(&self, config: &GatewayConfig) -> Result<(), ValidationError> {
        if config.router.default.is_some() || config.providers.is_empty() {
            return Ok(());
        }
        if self.require_default_route {
            return Err(ValidationError::required("router.default")
                .with_hint("Requests without a resolvable model have nowhere to go"));
        }
        warn!("router.default is not set; unrouted requests keep their inbound model");
        Ok(())
    }

    /// Unknown fallback providers are skipped at request time, so only warn here
    fn check_fallback_references(&self, config: &GatewayConfig) {
        for (scenario, candidates) in &config.fallback {
            for candidate in candidates {
                let Some((provider, _)) = split_model_ref(candidate) else {
                    continue;
                };
                if !config.providers.iter().any(|p| p.name == provider) {
                    warn!(
                        "fallback.{} references unknown provider '{}'; it will be skipped",
                        scenario, provider
                    );
                }
            }
        }
    }
}
