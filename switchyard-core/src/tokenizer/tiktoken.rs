//! In-process BPE counting; also the universal fallback

use super::{message_segments, system_segments, Tokenizer, TokenizerError};
use crate::protocol::TokenizeRequest;
use async_trait::async_trait;
use tiktoken_rs::CoreBPE;

pub const DEFAULT_ENCODING: &str = "cl100k_base";

pub struct TiktokenTokenizer {
    name: String,
    encoding: String,
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    /// Load a named encoding
    pub fn new(encoding: &str) -> Result<Self, TokenizerError> {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" | "gpt2" => tiktoken_rs::r50k_base(),
            other => {
                return Err(TokenizerError::Init(format!(
                    "Unknown tiktoken encoding: {}",
                    other
                )))
            }
        }
        .map_err(|e| TokenizerError::Init(format!("Failed to load {}: {}", encoding, e)))?;

        Ok(Self {
            name: format!("tiktoken-{}", encoding),
            encoding: encoding.to_string(),
            bpe,
        })
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl std::fmt::Debug for TiktokenTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenTokenizer")
            .field("encoding", &self.encoding)
            .finish()
    }
}

#[async_trait]
impl Tokenizer for TiktokenTokenizer {
    fn kind(&self) -> &'static str {
        "tiktoken"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<(), TokenizerError> {
        Ok(())
    }

    async fn count_tokens(&self, request: &TokenizeRequest) -> Result<usize, TokenizerError> {
        let mut total: usize = request
            .messages
            .iter()
            .flat_map(message_segments)
            .map(|text| self.count(&text))
            .sum();

        total += system_segments(request.system.as_ref())
            .iter()
            .map(|text| self.count(text))
            .sum::<usize>();

        for tool in &request.tools {
            if let Some(description) = tool.description.as_deref().filter(|d| !d.is_empty()) {
                total += self.count(&format!("{}{}", tool.name, description));
            }
            if let Some(schema) = &tool.input_schema {
                total += self.count(&schema.to_string());
            }
        }

        Ok(total)
    }

    fn encode_text(&self, text: &str) -> Option<Vec<u32>> {
        Some(
            self.bpe
                .encode_ordinary(text)
                .into_iter()
                .map(|id| id as u32)
                .collect(),
        )
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::sync::LazyLock;

    static CL100K: LazyLock<TiktokenTokenizer> =
        LazyLock::new(|| TiktokenTokenizer::new(DEFAULT_ENCODING).unwrap());

    fn request() -> TokenizeRequest {
        serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "Hello, world"},
                {"role": "assistant", "content": [{"type": "tool_use", "input": {"path": "a.rs"}}]}
            ],
            "system": "You are terse.",
            "tools": [{"name": "Read", "description": "Read a file", "input_schema": {"type": "object"}}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_counts_are_deterministic() {
        let tokenizer = TiktokenTokenizer::new(DEFAULT_ENCODING).unwrap();
        let req = request();
        let first = tokenizer.count_tokens(&req).await.unwrap();
        let second = tokenizer.count_tokens(&req).await.unwrap();
        assert!(first > 0);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_tool_without_description_counts_schema_only() {
        let tokenizer = TiktokenTokenizer::new(DEFAULT_ENCODING).unwrap();
        let mut req = TokenizeRequest::default();
        req.tools = vec![crate::protocol::ToolDefinition {
            name: "VeryLongToolNameThatWouldCount".to_string(),
            input_schema: Some(json!({})),
            ..Default::default()
        }];
        let count = tokenizer.count_tokens(&req).await.unwrap();
        assert_eq!(count, tokenizer.encode_text("{}").unwrap().len());
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        assert!(matches!(
            TiktokenTokenizer::new("nope"),
            Err(TokenizerError::Init(_))
        ));
    }

    #[test]
    fn test_encode_text() {
        let tokenizer = TiktokenTokenizer::new("o200k_base").unwrap();
        assert_eq!(tokenizer.name(), "tiktoken-o200k_base");
        assert!(!tokenizer.encode_text("hello there").unwrap().is_empty());
    }

    fn count_blocking(req: &TokenizeRequest) -> usize {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(CL100K.count_tokens(req))
            .unwrap()
    }

    proptest! {
        #[test]
        fn prop_counts_repeat_and_stay_positive(
            turns in proptest::collection::vec("[a-zA-Z][a-zA-Z0-9 ,.!?]{0,40}", 1..5),
            system in proptest::option::of("[a-zA-Z ]{1,30}"),
            tools in proptest::collection::vec(("[a-z_]{1,12}", "[a-zA-Z ]{0,24}"), 0..3),
        ) {
            let messages: Vec<Value> = turns
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    let role = if i % 2 == 0 { "user" } else { "assistant" };
                    json!({"role": role, "content": text})
                })
                .collect();
            let tools: Vec<Value> = tools
                .iter()
                .map(|(name, description)| json!({
                    "name": name,
                    "description": description,
                    "input_schema": {"type": "object"}
                }))
                .collect();
            let mut body = json!({"messages": messages, "tools": tools});
            if let Some(system) = &system {
                body["system"] = json!(system);
            }
            let req: TokenizeRequest = serde_json::from_value(body).unwrap();

            let first = count_blocking(&req);
            prop_assert!(first > 0);
            prop_assert_eq!(first, count_blocking(&req));
        }
    }
}
