//! Secret handling for provider credentials
//!
//! API keys live in [`SecretString`] so they never leak through `Debug` or
//! `Display`. Whole-config snapshots handed to collaborators are scrubbed with
//! [`redact_value`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A wrapper type for sensitive strings like API keys
#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the actual value (use with caution)
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }

    /// Partially redacted form for diagnostics
    pub fn partial_redact(&self) -> String {
        if self.value.is_empty() {
            return "[EMPTY]".to_string();
        }

        let chars: Vec<char> = self.value.chars().collect();
        let len = chars.len();
        if len <= 8 {
            "[REDACTED]".to_string()
        } else if self.value.starts_with("sk-") {
            let tail: String = chars[len - 4..].iter().collect();
            format!("sk-...{}", tail)
        } else {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[len - 2..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

const SENSITIVE_PATTERNS: [&str; 7] = [
    "api_key",
    "apikey",
    "secret",
    "password",
    "credential",
    "authorization",
    "passphrase",
];

/// Whether a field name looks like it holds a credential
pub fn is_sensitive_field(field_name: &str) -> bool {
    let field_lower = field_name.to_lowercase();
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| field_lower.contains(pattern))
}

/// Recursively replace the values of sensitive fields with `[REDACTED]`
pub fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if is_sensitive_field(key) && inner.is_string() {
                    *inner = Value::String("[REDACTED]".to_string());
                } else {
                    redact_value(inner);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_secret_string_redaction() {
        let secret = SecretString::new("sk-1234567890abcdef");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.partial_redact(), "sk-...cdef");
    }

    #[test]
    fn test_secret_serializes_transparently() {
        let secret = SecretString::new("abc");
        assert_eq!(serde_json::to_value(&secret).unwrap(), json!("abc"));
    }

    #[test]
    fn test_redact_value_scrubs_nested_keys() {
        let mut value = json!({
            "providers": [{"name": "p", "api_key": "sk-live"}],
            "tokenizer": {"apiKey": "tok", "url": "http://x"}
        });
        redact_value(&mut value);
        assert_eq!(value["providers"][0]["api_key"], "[REDACTED]");
        assert_eq!(value["providers"][0]["name"], "p");
        assert_eq!(value["tokenizer"]["apiKey"], "[REDACTED]");
        assert_eq!(value["tokenizer"]["url"], "http://x");
    }
}
