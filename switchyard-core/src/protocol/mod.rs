//! Request data models
//!
//! `types` holds the endpoint-native shapes the router and tokenizers inspect;
//! `unified` holds the canonical form transformers exchange.

pub mod types;
pub mod unified;

pub use types::{
    ContentBlock, InboundMessage, MessageContent, MessagesRequest, RequestMetadata, SystemBlock,
    SystemPrompt, TokenizeRequest, ToolDefinition,
};
pub use unified::{
    ContentPart, FunctionCall, FunctionDefinition, ImageUrl, MessageRole, ReasoningConfig,
    Thinking, ToolCall, UnifiedChatRequest, UnifiedContent, UnifiedMessage, UnifiedTool,
};
