use super::Transformer;
use async_trait::async_trait;

/// Chat Completions endpoint; the unified shape already is its wire format
#[derive(Debug, Default)]
pub struct OpenAITransformer;

impl OpenAITransformer {
    pub const NAME: &'static str = "openai";
    pub const ENDPOINT: &'static str = "/v1/chat/completions";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for OpenAITransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn endpoint(&self) -> Option<&str> {
        Some(Self::ENDPOINT)
    }
}
