//! OpenAI Responses API provider and `/v1/responses` endpoint
//!
//! As a provider transformer it rewrites unified chat requests into
//! Responses `input` items and converts Responses output, buffered or
//! streamed, back to Chat Completions. As an endpoint it serves Responses
//! clients unchanged, which a provider bound to this transformer alone
//! forwards without reshaping.

use super::{ProviderResponse, RequestContext, Transformed, Transformer};
use crate::error::GatewayResult;
use crate::providers::Provider;
use crate::streaming::{convert_responses_stream, responses_to_chat};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

#[derive(Debug, Default)]
pub struct OpenAIResponsesTransformer;

impl OpenAIResponsesTransformer {
    pub const NAME: &'static str = "openai-responses";
    pub const ENDPOINT: &'static str = "/v1/responses";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transformer for OpenAIResponsesTransformer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn endpoint(&self) -> Option<&str> {
        Some(Self::ENDPOINT)
    }

    async fn transform_request_in(
        &self,
        body: Value,
        _provider: &Provider,
        _ctx: &RequestContext,
    ) -> GatewayResult<Transformed> {
        Ok(Transformed::body(to_responses_request(body)))
    }

    async fn transform_response_out(
        &self,
        response: ProviderResponse,
        _ctx: &RequestContext,
    ) -> GatewayResult<ProviderResponse> {
        Ok(response
            .map_json(|payload| responses_to_chat(&payload).unwrap_or(payload))
            .map_stream(convert_responses_stream))
    }
}

/// Rewrite a unified chat request as a Responses API request
pub(crate) fn to_responses_request(body: Value) -> Value {
    let Value::Object(mut request) = body else {
        return body;
    };

    request.remove("temperature");
    request.remove("max_tokens");

    if let Some(reasoning) = request.get("reasoning").filter(|r| !r.is_null()) {
        let effort = reasoning.get("effort").cloned().unwrap_or(Value::Null);
        request.insert(
            "reasoning".to_string(),
            json!({"effort": effort, "summary": "detailed"}),
        );
    }

    let messages = match request.remove("messages") {
        Some(Value::Array(messages)) => messages,
        _ => Vec::new(),
    };

    let mut input = Vec::new();

    if let Some(system) = messages.iter().find(|m| role_of(m) == Some("system")) {
        match system.get("content") {
            Some(Value::Array(items)) => {
                for item in items {
                    let text = match item {
                        Value::String(s) => s.clone(),
                        other => other
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    };
                    input.push(json!({"role": "system", "content": text}));
                }
            }
            Some(content) => {
                request.insert("instructions".to_string(), content.clone());
            }
            None => {}
        }
    }

    for message in messages {
        let Value::Object(mut message) = message else {
            continue;
        };
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if role == "system" {
            continue;
        }

        if let Some(Value::Array(parts)) = message.get("content") {
            let converted: Vec<Value> = parts
                .iter()
                .filter_map(|part| normalize_content_part(part, &role))
                .collect();
            if converted.is_empty() {
                message.remove("content");
            } else {
                message.insert("content".to_string(), Value::Array(converted));
            }
        }

        match role.as_str() {
            "tool" => {
                let mut item = message;
                item.remove("cache_control");
                item.remove("role");
                let call_id = item.remove("tool_call_id").unwrap_or(Value::Null);
                let output = item.remove("content").unwrap_or(Value::Null);
                item.insert("type".to_string(), json!("function_call_output"));
                item.insert("call_id".to_string(), call_id);
                item.insert("output".to_string(), output);
                input.push(Value::Object(item));
            }
            "assistant" if message.get("tool_calls").is_some_and(Value::is_array) => {
                let calls = message
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for call in calls {
                    input.push(json!({
                        "type": "function_call",
                        "arguments": call.pointer("/function/arguments").cloned().unwrap_or(Value::Null),
                        "name": call.pointer("/function/name").cloned().unwrap_or(Value::Null),
                        "call_id": call.get("id").cloned().unwrap_or(Value::Null),
                    }));
                }
            }
            _ => input.push(Value::Object(message)),
        }
    }

    request.insert("input".to_string(), Value::Array(input));

    if let Some(Value::Array(tools)) = request.remove("tools") {
        let has_web_search = tools.iter().any(|t| function_name(t) == Some("web_search"));
        let mut converted: Vec<Value> = tools
            .into_iter()
            .filter(|t| function_name(t) != Some("web_search"))
            .map(flatten_tool)
            .collect();
        if has_web_search {
            converted.push(json!({"type": "web_search"}));
        }
        request.insert("tools".to_string(), Value::Array(converted));
    }

    request.insert("parallel_tool_calls".to_string(), Value::Bool(false));
    Value::Object(request)
}

fn normalize_content_part(part: &Value, role: &str) -> Option<Value> {
    let assistant = role == "assistant";
    match part.get("type").and_then(Value::as_str) {
        Some("text") => Some(json!({
            "type": if assistant { "output_text" } else { "input_text" },
            "text": part.get("text").cloned().unwrap_or(Value::Null),
        })),
        Some("image_url") => {
            let mut image = Map::new();
            image.insert(
                "type".to_string(),
                json!(if assistant { "output_image" } else { "input_image" }),
            );
            if let Some(url) = part.pointer("/image_url/url").filter(|u| u.is_string()) {
                image.insert("image_url".to_string(), url.clone());
            }
            Some(Value::Object(image))
        }
        _ => None,
    }
}

fn flatten_tool(tool: Value) -> Value {
    let tool_type = tool.get("type").cloned().unwrap_or_else(|| json!("function"));
    let function = tool.get("function").cloned().unwrap_or(Value::Null);
    let name = function.get("name").cloned().unwrap_or(Value::Null);
    let description = function.get("description").cloned().unwrap_or(Value::Null);
    let mut parameters = function.get("parameters").cloned().unwrap_or(Value::Null);

    match name.as_str() {
        Some("WebSearch") => {
            if let Some(props) = parameters
                .get_mut("properties")
                .and_then(Value::as_object_mut)
            {
                props.remove("allowed_domains");
            }
        }
        Some("Edit") => {
            if let Some(params) = parameters.as_object_mut() {
                params.insert(
                    "required".to_string(),
                    json!(["file_path", "old_string", "new_string", "replace_all"]),
                );
            }
            return json!({
                "type": tool_type,
                "name": name,
                "description": description,
                "parameters": parameters,
                "strict": true,
            });
        }
        _ => {}
    }

    json!({
        "type": tool_type,
        "name": name,
        "description": description,
        "parameters": parameters,
    })
}

fn role_of(message: &Value) -> Option<&str> {
    message.get("role").and_then(Value::as_str)
}

fn function_name(tool: &Value) -> Option<&str> {
    tool.pointer("/function/name").and_then(Value::as_str)
}
