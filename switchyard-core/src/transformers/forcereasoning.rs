//! Prompted reasoning for models without native thinking support
//!
//! The request side asks the model to wrap its reasoning in
//! `<reasoning_content>` tags and replays earlier thinking in the same form.
//! The response side lifts the tagged text back out as thinking.

use super::{ProviderResponse, RequestContext, Transformed, Transformer};
use crate::error::GatewayResult;
use crate::providers::Provider;
use crate::streaming::extract_reasoning_stream;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use tracing::debug;

const PROMPT: &str = "Always think before answering. Even if the problem seems simple, always write down your reasoning process explicitly.\n\nOutput format:\n<reasoning_content>\nYour detailed thinking process goes here\n</reasoning_content>\nYour final answer must follow after the closing tag above.";

/// Most recent assistant turns whose thinking is replayed as text
const MAX_INTERLEAVED_TIMES: usize = 10;

static REASONING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<reasoning_content>(.*?)</reasoning_content>").expect("valid reasoning regex")
});

#[derive(Debug, Default)]
pub struct ForceReasoningTransformer;

impl ForceReasoningTransformer {
    pub const NAME: &'static str = "forcereasoning";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for ForceReasoningTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn transform_request_in(
        &self,
        mut body: Value,
        _provider: &Provider,
        ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        if let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) {
            let replayed = replay_thinking(messages);
            if replayed > 0 {
                debug!(
                    "[request_id: {}] Replayed thinking for {} assistant turns",
                    ctx.request_id, replayed
                );
            }
            inject_prompt(messages);
        }
        Ok(Transformed::body(body))
    }

    async fn transform_response_out(
        &self,
        response: ProviderResponse,
        _ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        Ok(response
            .map_json(extract_reasoning_json)
            .map_stream(extract_reasoning_stream))
    }
}

/// Fold `thinking` on assistant turns back into tagged text, newest first
fn replay_thinking(messages: &mut [Value]) -> usize {
    let mut times = 0;
    for message in messages
        .iter_mut()
        .rev()
        .filter(|m| m.get("role").and_then(Value::as_str) == Some("assistant"))
    {
        let Some(obj) = message.as_object_mut() else {
            continue;
        };
        let Some(thinking) = obj.remove("thinking") else {
            continue;
        };
        let Some(reasoning) = thinking
            .get("content")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
        else {
            continue;
        };

        let existing = content_text(obj.get("content"));
        if existing.is_empty() || times < MAX_INTERLEAVED_TIMES {
            times += 1;
            obj.insert(
                "content".to_string(),
                Value::String(format!(
                    "<reasoning_content>{}</reasoning_content>\n{}",
                    reasoning, existing
                )),
            );
        }
    }
    times
}

/// Ask for tagged reasoning on the turn the model is about to answer
fn inject_prompt(messages: &mut Vec<Value>) {
    let prompt_part = json!({"type": "text", "text": PROMPT});
    let Some(last) = messages.last_mut() else {
        return;
    };

    let role = last.get("role").and_then(Value::as_str).map(str::to_owned);
    match role.as_deref() {
        Some("user") => {
            if let Some(parts) = last.get_mut("content").and_then(Value::as_array_mut) {
                parts.push(prompt_part);
                return;
            }
            let existing = content_text(last.get("content"));
            last["content"] = json!([prompt_part, {"type": "text", "text": existing}]);
        }
        Some("tool") => messages.push(json!({"role": "user", "content": [prompt_part]})),
        _ => {}
    }
}

/// Copy tagged reasoning from a completion into a top-level `thinking`
fn extract_reasoning_json(mut body: Value) -> Value {
    let reasoning = body
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .and_then(|content| REASONING_RE.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|r| !r.is_empty());

    if let (Some(reasoning), Some(obj)) = (reasoning, body.as_object_mut()) {
        obj.insert("thinking".to_string(), json!({"content": reasoning}));
    }
    body
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_provider;
    use crate::transformers::ResponseBody;

    async fn run(body: Value) -> Value {
        let provider = test_provider("p", &["forcereasoning"]);
        let ctx = RequestContext::new("/v1/messages");
        ForceReasoningTransformer::new()
            .transform_request_in(body, &provider, &ctx)
            .await
            .unwrap()
            .body
    }

    #[tokio::test]
    async fn test_prompt_appended_to_user_parts() {
        let body = run(json!({"messages": [
            {"role": "user", "content": [{"type": "text", "text": "hi"}]}
        ]}))
        .await;
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["text"], PROMPT);
    }

    #[tokio::test]
    async fn test_prompt_wraps_string_content() {
        let body = run(json!({"messages": [{"role": "user", "content": "hi"}]})).await;
        assert_eq!(body["messages"][0]["content"][0]["text"], PROMPT);
        assert_eq!(body["messages"][0]["content"][1]["text"], "hi");
    }

    #[tokio::test]
    async fn test_user_turn_added_after_tool_result() {
        let body = run(json!({"messages": [
            {"role": "user", "content": "hi"},
            {"role": "tool", "tool_call_id": "t", "content": "ok"}
        ]}))
        .await;
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"][0]["text"], PROMPT);
    }

    #[tokio::test]
    async fn test_thinking_replayed_for_recent_turns_only() {
        let mut messages: Vec<Value> = (0..12)
            .map(|i| {
                json!({
                    "role": "assistant",
                    "content": format!("a{}", i),
                    "thinking": {"content": format!("t{}", i)}
                })
            })
            .collect();
        messages.push(json!({"role": "user", "content": "next"}));

        let body = run(json!({"messages": messages})).await;
        let out = body["messages"].as_array().unwrap();
        assert_eq!(out[11]["content"], "<reasoning_content>t11</reasoning_content>\na11");
        assert_eq!(out[2]["content"], "<reasoning_content>t2</reasoning_content>\na2");
        assert_eq!(out[1]["content"], "a1");
        assert!(out.iter().all(|m| m.get("thinking").is_none()));
    }

    #[test]
    fn test_json_reasoning_extracted() {
        let body = extract_reasoning_json(json!({
            "choices": [{"message": {"content": "<reasoning_content>\nstep\n</reasoning_content>answer"}}]
        }));
        assert_eq!(body["thinking"]["content"], "\nstep\n");

        let plain = extract_reasoning_json(json!({"choices": [{"message": {"content": "x"}}]}));
        assert!(plain.get("thinking").is_none());
    }

    #[tokio::test]
    async fn test_response_out_keeps_status() {
        let ctx = RequestContext::new("/v1/messages");
        let resp = ForceReasoningTransformer::new()
            .transform_response_out(ProviderResponse::json(201, json!({"choices": []})), &ctx)
            .await
            .unwrap();
        assert_eq!(resp.status, 201);
        assert!(matches!(resp.body, ResponseBody::Json(_)));
    }
}
