//! Token counting
//!
//! Three backends implement [`Tokenizer`]: in-process BPE via tiktoken,
//! HuggingFace `tokenizer.json` models fetched from the hub, and remote
//! counting APIs. [`TokenizerService`] caches initialized instances and falls
//! back to tiktoken whenever a configured backend cannot be brought up.

mod api;
mod error;
mod huggingface;
mod service;
mod tiktoken;

pub use api::ApiTokenizer;
pub use error::TokenizerError;
pub use huggingface::HuggingFaceTokenizer;
pub use service::TokenizerService;
pub use tiktoken::{TiktokenTokenizer, DEFAULT_ENCODING};

use crate::protocol::{ContentBlock, InboundMessage, MessageContent, SystemPrompt, TokenizeRequest};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// A token counting backend
#[async_trait]
pub trait Tokenizer: Send + Sync {
    /// Backend family: `tiktoken`, `huggingface` or `api`
    fn kind(&self) -> &'static str;

    /// Human-readable name reported alongside counts
    fn name(&self) -> &str;

    /// Prepare the backend; calling it again is a no-op
    async fn initialize(&mut self) -> Result<(), TokenizerError>;

    /// Count tokens across messages, system prompt and tools
    async fn count_tokens(&self, request: &TokenizeRequest) -> Result<usize, TokenizerError>;

    /// Token ids for a piece of text, when the backend encodes locally
    fn encode_text(&self, _text: &str) -> Option<Vec<u32>> {
        None
    }

    fn is_initialized(&self) -> bool;

    fn dispose(&self) {}
}

/// Outcome of a counting call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenizerResult {
    pub token_count: usize,
    pub tokenizer_used: String,
    pub cached: bool,
}

/// Rough token estimate when no tokenizer is at hand
///
/// Assumes about 1.5 characters per token for CJK ideographs and 4 for
/// everything else.
pub fn estimate_tokens(text: &str) -> usize {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if ('\u{4e00}'..='\u{9fa5}').contains(&c) {
            (cjk + 1, other)
        } else {
            (cjk, other + 1)
        }
    });
    (cjk as f64 / 1.5 + other as f64 / 4.0).ceil() as usize
}

/// Text counted for one content block, if the block carries any
pub(crate) fn block_text(block: &ContentBlock) -> Option<String> {
    match block.kind.as_str() {
        "text" => block.text.clone(),
        "tool_use" => block.input.as_ref().map(Value::to_string),
        "tool_result" => Some(match &block.content {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "null".to_string(),
        }),
        _ => None,
    }
}

/// Text segments of a message in block order
pub(crate) fn message_segments(message: &InboundMessage) -> Vec<String> {
    match &message.content {
        MessageContent::Text(text) => vec![text.clone()],
        MessageContent::Blocks(blocks) => blocks.iter().filter_map(block_text).collect(),
        MessageContent::Other(_) => Vec::new(),
    }
}

/// Text segments of the system prompt; only `text` blocks count
pub(crate) fn system_segments(system: Option<&SystemPrompt>) -> Vec<String> {
    match system {
        Some(SystemPrompt::Text(text)) => vec![text.clone()],
        Some(SystemPrompt::Blocks(blocks)) => blocks
            .iter()
            .filter(|b| b.kind == "text")
            .flat_map(|b| match &b.text {
                Value::String(s) => vec![s.clone()],
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect(),
                _ => Vec::new(),
            })
            .collect(),
        None => Vec::new(),
    }
}

/// Every text segment of a request: messages, system, then tool name,
/// description and schema
pub(crate) fn request_segments(request: &TokenizeRequest) -> Vec<String> {
    let mut parts: Vec<String> = request
        .messages
        .iter()
        .flat_map(message_segments)
        .filter(|s| !s.is_empty())
        .collect();
    parts.extend(system_segments(request.system.as_ref()));
    for tool in &request.tools {
        if !tool.name.is_empty() {
            parts.push(tool.name.clone());
        }
        if let Some(description) = tool.description.as_deref().filter(|d| !d.is_empty()) {
            parts.push(description.to_string());
        }
        if let Some(schema) = &tool.input_schema {
            parts.push(schema.to_string());
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("", 0; "empty")]
    #[test_case("abcd", 1; "four ascii")]
    #[test_case("abcde", 2; "rounds up")]
    #[test_case("你好吗", 2; "cjk")]
    fn test_estimate_tokens(text: &str, expected: usize) {
        assert_eq!(estimate_tokens(text), expected);
    }

    #[test]
    fn test_request_segments_cover_all_sections() {
        let request: TokenizeRequest = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t", "name": "Read", "input": {"p": 1}},
                    {"type": "image", "source": {}}
                ]},
                {"role": "user", "content": [{"type": "tool_result", "content": [{"text": "r"}]}]}
            ],
            "system": [{"type": "text", "text": ["a", "b"]}, {"type": "other", "text": "skip"}],
            "tools": [{"name": "Read", "description": "read a file", "input_schema": {"type": "object"}}]
        }))
        .unwrap();

        assert_eq!(
            request_segments(&request),
            vec![
                "hi".to_string(),
                r#"{"p":1}"#.to_string(),
                r#"[{"text":"r"}]"#.to_string(),
                "a".to_string(),
                "b".to_string(),
                "Read".to_string(),
                "read a file".to_string(),
                r#"{"type":"object"}"#.to_string(),
            ]
        );
    }
}
