//! Unified chat completion to an Anthropic Messages response

use crate::streaming::parse_tool_arguments;
use serde_json::{json, Map, Value};

pub(super) fn stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

/// Usage block in Anthropic field names
pub(super) fn usage(usage: Option<&Value>) -> Value {
    let field = |name: &str| {
        usage
            .and_then(|u| u.get(name))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    let mut out = json!({
        "input_tokens": field("prompt_tokens"),
        "output_tokens": field("completion_tokens"),
    });
    if let Some(cached) = usage
        .and_then(|u| u.pointer("/prompt_tokens_details/cached_tokens"))
        .and_then(Value::as_u64)
    {
        out["cache_read_input_tokens"] = json!(cached);
    }
    out
}

/// Convert a chat completion; anything that is not one passes through
pub(super) fn to_anthropic_message(body: Value, model: &str) -> Value {
    if body.get("type").and_then(Value::as_str) == Some("message") {
        return body;
    }
    let Some(choice) = body.pointer("/choices/0") else {
        return body;
    };
    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let mut content = Vec::new();
    let thinking = message
        .get("thinking")
        .or_else(|| body.get("thinking"))
        .filter(|t| t.is_object());
    if let Some(thinking) = thinking {
        if let Some(text) = thinking.get("content").and_then(Value::as_str) {
            content.push(json!({
                "type": "thinking",
                "thinking": text,
                "signature": thinking.get("signature").and_then(Value::as_str).unwrap_or_default(),
            }));
        }
    } else if let Some(text) = message.get("reasoning_content").and_then(Value::as_str) {
        content.push(json!({"type": "thinking", "thinking": text, "signature": ""}));
    }

    match message.get("content") {
        Some(Value::String(text)) if !text.is_empty() => {
            content.push(json!({"type": "text", "text": text}));
        }
        Some(Value::Array(parts)) => {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    content.push(json!({"type": "text", "text": text}));
                }
            }
        }
        _ => {}
    }

    if let Some(Value::Array(calls)) = message.get("tool_calls") {
        for call in calls {
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or_default();
            content.push(json!({
                "type": "tool_use",
                "id": call.get("id").cloned().unwrap_or(Value::Null),
                "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
                "input": parse_tool_arguments(arguments),
            }));
        }
    }

    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop");

    let mut out = Map::new();
    out.insert(
        "id".to_string(),
        body.get("id").cloned().unwrap_or_else(|| json!(message_id())),
    );
    out.insert("type".to_string(), json!("message"));
    out.insert("role".to_string(), json!("assistant"));
    out.insert(
        "model".to_string(),
        body.get("model").cloned().unwrap_or_else(|| json!(model)),
    );
    out.insert("content".to_string(), Value::Array(content));
    out.insert("stop_reason".to_string(), json!(stop_reason(finish_reason)));
    out.insert("stop_sequence".to_string(), Value::Null);
    out.insert("usage".to_string(), usage(body.get("usage")));
    Value::Object(out)
}

pub(super) fn message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}
