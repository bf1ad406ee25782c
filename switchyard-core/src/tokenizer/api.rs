//! Remote token counting over HTTP

use super::{message_segments, request_segments, Tokenizer, TokenizerError};
use crate::config::{lookup_path, RequestFormat, SecretString};
use crate::protocol::TokenizeRequest;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_RESPONSE_FIELD: &str = "token_count";

/// Tokenizer backed by a provider's counting endpoint
#[derive(Debug)]
pub struct ApiTokenizer {
    name: String,
    url: String,
    api_key: SecretString,
    request_format: RequestFormat,
    response_field: String,
    headers: HashMap<String, String>,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl ApiTokenizer {
    /// Both `url` and `api_key` are required
    pub fn new(
        url: Option<&str>,
        api_key: Option<&SecretString>,
        request_format: RequestFormat,
        response_field: Option<&str>,
        headers: HashMap<String, String>,
    ) -> Result<Self, TokenizerError> {
        let (url, api_key) = match (url, api_key) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => (url, key),
            _ => {
                return Err(TokenizerError::Init(
                    "API tokenizer requires url and apiKey".to_string(),
                ))
            }
        };

        let name = match url::Url::parse(url) {
            Ok(parsed) => format!("api-{}", parsed.host_str().unwrap_or(url)),
            Err(_) => format!("api-{}", url),
        };

        Ok(Self {
            name,
            url: url.to_string(),
            api_key: api_key.clone(),
            request_format,
            response_field: response_field
                .filter(|f| !f.is_empty())
                .unwrap_or(DEFAULT_RESPONSE_FIELD)
                .to_string(),
            headers,
            timeout: Duration::from_secs(30),
            client: None,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request body in the configured shape
    pub fn format_request_body(&self, request: &TokenizeRequest) -> Value {
        match self.request_format {
            RequestFormat::Standard => serde_json::to_value(request).unwrap_or(Value::Null),
            RequestFormat::Openai => json!({
                "model": "gpt-3.5-turbo",
                "messages": request
                    .messages
                    .iter()
                    .map(|m| json!({"role": m.role, "content": message_segments(m).join(" ")}))
                    .collect::<Vec<_>>(),
            }),
            RequestFormat::Anthropic => json!({
                "messages": request.messages,
                "system": request.system,
                "tools": request.tools,
            }),
            RequestFormat::Custom => json!({"text": request_segments(request).join(" ")}),
        }
    }

    /// Pull the count out of a response via the configured dot path
    pub fn extract_token_count(&self, data: &Value) -> Result<usize, TokenizerError> {
        let value = lookup_path(data, &self.response_field).ok_or_else(|| {
            TokenizerError::InvalidResponse(format!(
                "Field path '{}' not found in response",
                self.response_field
            ))
        })?;

        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize)
            .ok_or_else(|| {
                error!(
                    "Failed to extract token count from API response: {}",
                    data
                );
                TokenizerError::InvalidResponse(format!(
                    "Expected number at field path '{}', got {}",
                    self.response_field,
                    json_type(value)
                ))
            })
    }

    fn build_headers(&self) -> Result<HeaderMap, TokenizerError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
                .map_err(|e| TokenizerError::Init(format!("Invalid API key header: {}", e)))?,
        );
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| TokenizerError::Init(format!("Invalid header {}: {}", key, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TokenizerError::Init(format!("Invalid header {}: {}", key, e)))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl Tokenizer for ApiTokenizer {
    fn kind(&self) -> &'static str {
        "api"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<(), TokenizerError> {
        if self.client.is_some() {
            return Ok(());
        }
        url::Url::parse(&self.url)
            .map_err(|_| TokenizerError::Init(format!("Invalid API URL: {}", self.url)))?;
        let client = reqwest::Client::builder()
            .default_headers(self.build_headers()?)
            .build()
            .map_err(|e| TokenizerError::Init(e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn count_tokens(&self, request: &TokenizeRequest) -> Result<usize, TokenizerError> {
        let client = self.client.as_ref().ok_or(TokenizerError::NotInitialized)?;
        let body = self.format_request_body(request);
        debug!("Counting tokens via {}", self.url);

        let call = async {
            let response = client.post(&self.url).json(&body).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TokenizerError::Api(format!(
                    "API tokenizer request failed: {}",
                    status
                )));
            }
            let data: Value = response
                .json()
                .await
                .map_err(|e| TokenizerError::InvalidResponse(e.to_string()))?;
            self.extract_token_count(&data)
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| TokenizerError::Timeout(self.timeout.as_millis() as u64))?
    }

    fn is_initialized(&self) -> bool {
        self.client.is_some()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
