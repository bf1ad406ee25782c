//! Configuration error types

use std::fmt;
use thiserror::Error;

/// Errors raised while loading gateway configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read gateway config '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed gateway config '{path}' (line {}, column {}): {message}",
            .line.unwrap_or(0), .column.unwrap_or(0))]
    ParseError {
        path: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("config references ${{{var}}} but it is not set")]
    EnvVarNotFound { var: String },
}

/// First rejected field, addressed like `providers[0].base_url`
#[derive(Debug, Error)]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
    pub hint: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config at {}: {}", self.field_path, self.kind)?;
        match &self.hint {
            Some(hint) => write!(f, "; {}", hint),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("required field is missing")]
    RequiredFieldMissing,

    #[error("{message}")]
    InvalidFormat { message: String },

    #[error("provider '{name}' is declared more than once")]
    DuplicateProvider { name: String },

    #[error("invalid URL: {message}")]
    InvalidUrl { message: String },

    #[error("unsupported config version '{found}'")]
    UnsupportedVersion { found: String },

    #[error("no provider named '{name}'")]
    UnknownProvider { name: String },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn required(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::RequiredFieldMissing)
    }

    pub fn invalid_format(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::InvalidFormat { message })
    }

    pub fn invalid_url(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(field_path, ValidationErrorKind::InvalidUrl { message })
    }

    pub fn unknown_provider(field_path: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(field_path, ValidationErrorKind::UnknownProvider { name })
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
