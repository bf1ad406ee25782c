//! Responses API to Chat Completions conversion
//!
//! Streaming events are mapped one at a time by [`ResponsesStreamConverter`].
//! The choice index advances only when the event type changes, so a run of
//! deltas for the same logical block shares one index. [`responses_to_chat`]
//! handles the non-streaming payload.

use super::{
    data_frame, data_payload, done_frame, now_millis, now_secs, rewrite_stream, ByteStream,
    SseLineHandler, SseRewriter, DONE_MARKER,
};
use serde_json::{json, Map, Value};
use tracing::debug;

/// Per-stream event converter
#[derive(Debug)]
pub struct ResponsesStreamConverter {
    current_index: i64,
    last_event_type: String,
    ended: bool,
}

impl Default for ResponsesStreamConverter {
    fn default() -> Self {
        Self {
            current_index: -1,
            last_event_type: String::new(),
            ended: false,
        }
    }
}

impl ResponsesStreamConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has already been emitted
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn index_for(&mut self, event_type: &str) -> i64 {
        if event_type != self.last_event_type {
            self.current_index += 1;
            self.last_event_type = event_type.to_string();
        }
        self.current_index
    }

    /// Convert one Responses event; unknown event types produce nothing
    pub fn convert_event(&mut self, event: &Value) -> Option<Value> {
        let event_type = event.get("type").and_then(Value::as_str)?;
        let item_id = str_field(event, "item_id");
        let model = event.pointer("/response/model").cloned().unwrap_or(Value::Null);

        match event_type {
            "response.output_text.delta" => {
                let index = self.index_for(event_type);
                Some(chat_chunk(
                    item_id,
                    model,
                    index,
                    json!({"content": delta_text(event)}),
                    Value::Null,
                ))
            }
            "response.output_item.added" => {
                let item = event.get("item")?;
                match item.get("type").and_then(Value::as_str) {
                    Some("function_call") => {
                        let call_id = str_field(item, "call_id").or_else(|| str_field(item, "id"));
                        let index = self.index_for(event_type);
                        Some(chat_chunk(
                            call_id.clone(),
                            model,
                            index,
                            json!({
                                "role": "assistant",
                                "tool_calls": [{
                                    "index": 0,
                                    "id": call_id,
                                    "type": "function",
                                    "function": {
                                        "name": str_field(item, "name").unwrap_or_default(),
                                        "arguments": ""
                                    }
                                }]
                            }),
                            Value::Null,
                        ))
                    }
                    Some("message") => {
                        let texts: Vec<Value> = item
                            .get("content")
                            .and_then(Value::as_array)
                            .into_iter()
                            .flatten()
                            .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
                            .map(|part| {
                                json!({"type": "text", "text": str_field(part, "text").unwrap_or_default()})
                            })
                            .collect();

                        let content = match texts.as_slice() {
                            [] => return None,
                            [single] => single["text"].clone(),
                            _ => Value::Array(texts),
                        };
                        if content.as_str() == Some("") {
                            return None;
                        }

                        let index = self.index_for(event_type);
                        Some(chat_chunk(
                            str_field(item, "id"),
                            model,
                            index,
                            json!({"role": "assistant", "content": content}),
                            Value::Null,
                        ))
                    }
                    _ => None,
                }
            }
            "response.output_text.annotation.added" => {
                let annotation = event.get("annotation").cloned().unwrap_or(Value::Null);
                let index = self.index_for(event_type);
                Some(chat_chunk(
                    item_id,
                    model,
                    index,
                    json!({"annotations": [url_citation(&annotation)]}),
                    Value::Null,
                ))
            }
            "response.function_call_arguments.delta" => {
                let index = self.index_for(event_type);
                Some(chat_chunk(
                    item_id,
                    model,
                    index,
                    json!({"tool_calls": [{"index": 0, "function": {"arguments": delta_text(event)}}]}),
                    Value::Null,
                ))
            }
            "response.reasoning_summary_text.delta" => {
                let index = self.index_for(event_type);
                Some(chat_chunk(
                    item_id,
                    model,
                    index,
                    json!({"thinking": {"content": delta_text(event)}}),
                    Value::Null,
                ))
            }
            "response.reasoning_summary_part.done" if event.get("part").is_some() => {
                Some(chat_chunk(
                    item_id.clone(),
                    model,
                    self.current_index,
                    json!({"thinking": {"signature": item_id}}),
                    Value::Null,
                ))
            }
            "response.completed" => {
                let has_tool_call = event
                    .pointer("/response/output")
                    .and_then(Value::as_array)
                    .is_some_and(|items| {
                        items
                            .iter()
                            .any(|i| i.get("type").and_then(Value::as_str) == Some("function_call"))
                    });
                self.ended = true;
                Some(chat_chunk(
                    event.pointer("/response/id").and_then(Value::as_str).map(str::to_owned),
                    model,
                    0,
                    json!({}),
                    json!(if has_tool_call { "tool_calls" } else { "stop" }),
                ))
            }
            other => {
                debug!("Ignoring Responses event {}", other);
                None
            }
        }
    }
}

impl SseLineHandler for ResponsesStreamConverter {
    fn on_line(&mut self, line: &str, out: &mut String) {
        if line.trim().is_empty() || line.starts_with("event:") {
            return;
        }

        let Some(payload) = data_payload(line) else {
            out.push_str(line);
            out.push('\n');
            return;
        };

        let payload = payload.trim();
        if payload == DONE_MARKER {
            self.ended = true;
            out.push_str(&done_frame());
            return;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(event) => {
                if let Some(chunk) = self.convert_event(&event) {
                    out.push_str(&data_frame(&chunk));
                }
            }
            Err(_) => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    fn on_end(&mut self, out: &mut String) {
        if !self.ended {
            self.ended = true;
            out.push_str(&done_frame());
        }
    }
}

/// Rewrite a Responses API SSE stream as Chat Completions chunks
pub fn convert_responses_stream(input: ByteStream) -> ByteStream {
    rewrite_stream(input, SseRewriter::new(ResponsesStreamConverter::new()))
}

/// Convert a non-streaming Responses payload to a chat completion
///
/// Returns `None` when the payload is not a Responses object.
pub fn responses_to_chat(payload: &Value) -> Option<Value> {
    if payload.get("object").and_then(Value::as_str) != Some("response") {
        return None;
    }
    let output = payload.get("output")?.as_array()?;

    let find = |kind: &str| {
        output
            .iter()
            .find(|item| item.get("type").and_then(Value::as_str) == Some(kind))
    };
    let message = find("message");
    let function_call = find("function_call");

    let parts: &[Value] = message
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let annotations = parts
        .first()
        .and_then(|p| p.get("annotations"))
        .and_then(Value::as_array)
        .map(|items| Value::Array(items.iter().map(url_citation).collect()));

    let thinking = message
        .and_then(|m| m.get("reasoning"))
        .and_then(Value::as_str)
        .map(|r| json!({"content": r}));

    let content = message.and_then(|m| m.get("content")).map(|_| {
        let mut text = String::new();
        let mut images = Vec::new();
        for part in parts {
            match part.get("type").and_then(Value::as_str) {
                Some("output_text") => text.push_str(part.get("text").and_then(Value::as_str).unwrap_or("")),
                Some("output_image") => images.extend(image_content(
                    str_field(part, "image_url"),
                    None,
                    part.get("mime_type"),
                )),
                Some("output_image_base64") => images.extend(image_content(
                    None,
                    str_field(part, "image_base64"),
                    part.get("mime_type"),
                )),
                _ => {}
            }
        }

        if images.is_empty() {
            Value::String(text)
        } else {
            let mut all = Vec::with_capacity(images.len() + 1);
            if !text.is_empty() {
                all.push(json!({"type": "text", "text": text}));
            }
            all.extend(images);
            Value::Array(all)
        }
    });
    let content = match content {
        Some(Value::String(s)) if s.is_empty() => Value::Null,
        Some(v) => v,
        None => Value::Null,
    };

    let tool_calls = function_call.map(|call| {
        json!([{
            "id": call.get("call_id").or_else(|| call.get("id")).cloned().unwrap_or(Value::Null),
            "type": "function",
            "function": {
                "name": call.get("name").cloned().unwrap_or(Value::Null),
                "arguments": call.get("arguments").cloned().unwrap_or(Value::Null),
            }
        }])
    });

    let usage = payload.get("usage").filter(|u| u.is_object()).map(|u| {
        let field = |name: &str| u.get(name).and_then(Value::as_u64).unwrap_or(0);
        json!({
            "prompt_tokens": field("input_tokens"),
            "completion_tokens": field("output_tokens"),
            "total_tokens": field("total_tokens"),
        })
    });

    let finish_reason = if tool_calls.is_some() { "tool_calls" } else { "stop" };

    Some(json!({
        "id": str_field(payload, "id").unwrap_or_else(fallback_id),
        "object": "chat.completion",
        "created": payload.get("created_at").cloned().unwrap_or(Value::Null),
        "model": payload.get("model").cloned().unwrap_or(Value::Null),
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": content,
                "tool_calls": tool_calls,
                "thinking": thinking,
                "annotations": annotations,
            },
            "logprobs": null,
            "finish_reason": finish_reason,
        }],
        "usage": usage,
    }))
}

fn chat_chunk(
    id: Option<String>,
    model: Value,
    index: i64,
    delta: Value,
    finish_reason: Value,
) -> Value {
    let mut chunk = Map::new();
    chunk.insert("id".into(), json!(id.unwrap_or_else(fallback_id)));
    chunk.insert("object".into(), json!("chat.completion.chunk"));
    chunk.insert("created".into(), json!(now_secs()));
    if !model.is_null() {
        chunk.insert("model".into(), model);
    }
    chunk.insert(
        "choices".into(),
        json!([{"index": index, "delta": delta, "finish_reason": finish_reason}]),
    );
    Value::Object(chunk)
}

fn url_citation(annotation: &Value) -> Value {
    json!({
        "type": "url_citation",
        "url_citation": {
            "url": str_field(annotation, "url").unwrap_or_default(),
            "title": str_field(annotation, "title").unwrap_or_default(),
            "content": "",
            "start_index": annotation.get("start_index").and_then(Value::as_u64).unwrap_or(0),
            "end_index": annotation.get("end_index").and_then(Value::as_u64).unwrap_or(0),
        }
    })
}

fn image_content(url: Option<String>, b64: Option<String>, mime: Option<&Value>) -> Option<Value> {
    if url.is_none() && b64.is_none() {
        return None;
    }
    let mut image_url = Map::new();
    image_url.insert("url".into(), json!(url.unwrap_or_default()));
    if let Some(b64) = b64 {
        image_url.insert("b64_json".into(), json!(b64));
    }
    let mut part = json!({"type": "image_url", "image_url": image_url});
    if let Some(mime) = mime.filter(|m| !m.is_null()) {
        part["media_type"] = mime.clone();
    }
    Some(part)
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn delta_text(event: &Value) -> String {
    event.get("delta").and_then(Value::as_str).unwrap_or("").to_string()
}

fn fallback_id() -> String {
    format!("chatcmpl-{}", now_millis())
}
