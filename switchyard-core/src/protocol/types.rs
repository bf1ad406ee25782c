//! Endpoint-native request shapes read by the router and tokenizers
//!
//! These types are deliberately permissive: unknown block types and fields
//! survive a round trip through `extra`, so the router can inspect a request
//! without constraining what clients send.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Anthropic Messages-style inbound body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub messages: Vec<InboundMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Extended-thinking request, any non-null value turns it on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RequestMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MessagesRequest {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    pub fn wants_thinking(&self) -> bool {
        match &self.thinking {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::Object(obj)) => {
                obj.get("type").and_then(Value::as_str) != Some("disabled")
            }
            Some(_) => true,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.user_id.as_deref()
    }

    /// Text of the second system block, where subagent tags live
    pub fn second_system_text(&self) -> Option<&str> {
        match &self.system {
            Some(SystemPrompt::Blocks(blocks)) => blocks.get(1)?.text.as_str(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub role: String,

    #[serde(default)]
    pub content: MessageContent,
}

/// Message content: a bare string or a list of typed blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    /// Anything else, e.g. `null` on assistant turns that only call tools
    Other(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

/// One content block; only the fields token counting needs are typed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// `tool_use` arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,

    /// `tool_result` payload, string or structured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// System prompt: a bare string or a list of text blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Usually a string; some clients send an array of strings
    #[serde(default)]
    pub text: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(default)]
    pub name: String,

    /// Server tools such as `web_search_20250305` carry a type
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The slice of a request that token counting looks at
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenizeRequest {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl From<&MessagesRequest> for TokenizeRequest {
    fn from(req: &MessagesRequest) -> Self {
        Self {
            messages: req.messages.clone(),
            system: req.system.clone(),
            tools: req.tools.clone().unwrap_or_default(),
        }
    }
}
