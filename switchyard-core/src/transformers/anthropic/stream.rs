//! Chat Completions SSE chunks to Anthropic Messages stream events

use super::response::{message_id, stop_reason, usage};
use crate::streaming::{data_payload, event_frame, SseLineHandler, DONE_MARKER};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    ToolUse(u64),
}

#[derive(Debug, Clone, Copy)]
struct OpenBlock {
    index: u64,
    kind: BlockKind,
}

/// Rebuilds the Messages event sequence from chat chunks
///
/// Emits `message_start` on the first chunk, then one content block per run
/// of text, thinking, or tool-call deltas, and closes with `message_delta` and
/// `message_stop` on `[DONE]` or end of input, whichever comes first.
#[derive(Debug)]
pub(crate) struct ChatToMessagesStream {
    model: String,
    started: bool,
    finished: bool,
    block: Option<OpenBlock>,
    next_index: u64,
    tool_blocks: HashMap<u64, u64>,
    stop_reason: Option<&'static str>,
    usage: Option<Value>,
}

impl ChatToMessagesStream {
    pub(crate) fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            started: false,
            finished: false,
            block: None,
            next_index: 0,
            tool_blocks: HashMap::new(),
            stop_reason: None,
            usage: None,
        }
    }

    fn start(&mut self, chunk: &Value, out: &mut String) {
        if self.started {
            return;
        }
        self.started = true;
        let model = chunk
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(&self.model)
            .to_string();
        out.push_str(&event_frame(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": message_id(),
                    "type": "message",
                    "role": "assistant",
                    "model": model,
                    "content": [],
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": usage(chunk.get("usage")),
                }
            }),
        ));
    }

    /// Keep the current block when it matches, otherwise close it and open one
    fn open(&mut self, kind: BlockKind, content_block: Value, out: &mut String) -> u64 {
        if let Some(block) = self.block {
            if block.kind == kind {
                return block.index;
            }
        }
        self.close(out);
        let index = self.next_index;
        self.next_index += 1;
        out.push_str(&event_frame(
            "content_block_start",
            &json!({"type": "content_block_start", "index": index, "content_block": content_block}),
        ));
        self.block = Some(OpenBlock { index, kind });
        index
    }

    fn close(&mut self, out: &mut String) {
        if let Some(block) = self.block.take() {
            out.push_str(&event_frame(
                "content_block_stop",
                &json!({"type": "content_block_stop", "index": block.index}),
            ));
        }
    }

    fn delta(&self, index: u64, delta: Value, out: &mut String) {
        out.push_str(&event_frame(
            "content_block_delta",
            &json!({"type": "content_block_delta", "index": index, "delta": delta}),
        ));
    }

    fn process(&mut self, chunk: Value, out: &mut String) {
        if let Some(error) = chunk.get("error") {
            out.push_str(&event_frame("error", &json!({"type": "error", "error": error})));
            return;
        }
        self.start(&chunk, out);
        if let Some(u) = chunk.get("usage").filter(|u| u.is_object()) {
            self.usage = Some(u.clone());
        }

        let Some(choice) = chunk.pointer("/choices/0") else {
            return;
        };
        let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

        let thinking_text = delta
            .pointer("/thinking/content")
            .or_else(|| delta.get("reasoning_content"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty());
        if let Some(text) = thinking_text {
            let index = self.open(
                BlockKind::Thinking,
                json!({"type": "thinking", "thinking": ""}),
                out,
            );
            self.delta(index, json!({"type": "thinking_delta", "thinking": text}), out);
        }
        if let Some(signature) = delta.pointer("/thinking/signature").and_then(Value::as_str) {
            let index = self.open(
                BlockKind::Thinking,
                json!({"type": "thinking", "thinking": ""}),
                out,
            );
            self.delta(
                index,
                json!({"type": "signature_delta", "signature": signature}),
                out,
            );
            self.close(out);
        }

        if let Some(text) = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            let index = self.open(BlockKind::Text, json!({"type": "text", "text": ""}), out);
            self.delta(index, json!({"type": "text_delta", "text": text}), out);
        }

        if let Some(Value::Array(calls)) = delta.get("tool_calls") {
            for call in calls {
                self.tool_call(call, out);
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.stop_reason = Some(stop_reason(reason));
            self.close(out);
        }
    }

    fn tool_call(&mut self, call: &Value, out: &mut String) {
        let tool_index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let is_new = call.get("id").and_then(Value::as_str).is_some()
            || !self.tool_blocks.contains_key(&tool_index);

        let index = if is_new {
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            // A fresh id always starts a new block, even at a reused index
            self.close(out);
            let index = self.open(
                BlockKind::ToolUse(tool_index),
                json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
                out,
            );
            self.tool_blocks.insert(tool_index, index);
            index
        } else {
            match self.block {
                Some(block) if block.kind == BlockKind::ToolUse(tool_index) => block.index,
                _ => self.tool_blocks[&tool_index],
            }
        };

        if let Some(arguments) = call
            .pointer("/function/arguments")
            .and_then(Value::as_str)
            .filter(|a| !a.is_empty())
        {
            self.delta(
                index,
                json!({"type": "input_json_delta", "partial_json": arguments}),
                out,
            );
        }
    }

    fn finish(&mut self, out: &mut String) {
        if self.finished || !self.started {
            self.finished = true;
            return;
        }
        self.finished = true;
        self.close(out);
        out.push_str(&event_frame(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {
                    "stop_reason": self.stop_reason.unwrap_or("end_turn"),
                    "stop_sequence": null,
                },
                "usage": usage(self.usage.as_ref()),
            }),
        ));
        out.push_str(&event_frame("message_stop", &json!({"type": "message_stop"})));
    }
}

impl SseLineHandler for ChatToMessagesStream {
    fn on_line(&mut self, line: &str, out: &mut String) {
        if self.finished {
            return;
        }
        let Some(payload) = data_payload(line.trim()) else {
            return;
        };
        if payload.trim() == DONE_MARKER {
            self.finish(out);
            return;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(chunk) => self.process(chunk, out),
            Err(e) => tracing::debug!("Skipping unparseable stream chunk: {}", e),
        }
    }

    fn on_end(&mut self, out: &mut String) {
        self.finish(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[Value]) -> Vec<(String, Value)> {
        let mut handler = ChatToMessagesStream::new("m");
        let mut out = String::new();
        for line in lines {
            handler.on_line(&format!("data: {}", line), &mut out);
        }
        handler.on_line("data: [DONE]", &mut out);
        parse_events(&out)
    }

    fn parse_events(raw: &str) -> Vec<(String, Value)> {
        raw.split("\n\n")
            .filter(|f| !f.is_empty())
            .map(|frame| {
                let mut lines = frame.lines();
                let event = lines.next().unwrap().trim_start_matches("event: ").to_string();
                let data = lines.next().unwrap().trim_start_matches("data: ");
                (event, serde_json::from_str(data).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_text_then_tool_call_sequence() {
        let events = run(&[
            json!({"model": "glm", "choices": [{"delta": {"role": "assistant", "content": "Hi"}}]}),
            json!({"choices": [{"delta": {"content": " there"}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "c1", "function": {"name": "Read", "arguments": ""}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "function": {"arguments": "{\"p\":1}"}}]}}]}),
            json!({"choices": [{"delta": {}, "finish_reason": "tool_calls"}],
                   "usage": {"prompt_tokens": 3, "completion_tokens": 5}}),
        ]);

        let names: Vec<&str> = events.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(
            names,
            [
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(events[0].1["message"]["model"], "glm");
        assert_eq!(events[3].1["delta"]["text"], " there");
        assert_eq!(events[5].1["index"], 1);
        assert_eq!(events[5].1["content_block"]["name"], "Read");
        assert_eq!(events[6].1["delta"]["partial_json"], "{\"p\":1}");
        assert_eq!(events[8].1["delta"]["stop_reason"], "tool_use");
        assert_eq!(events[8].1["usage"]["output_tokens"], 5);
    }

    #[test]
    fn test_thinking_block_closes_on_signature() {
        let events = run(&[
            json!({"choices": [{"delta": {"thinking": {"content": "hmm"}}}]}),
            json!({"choices": [{"delta": {"thinking": {"signature": "123"}}}]}),
            json!({"choices": [{"delta": {"content": "ok"}, "finish_reason": "stop"}]}),
        ]);
        assert_eq!(events[1].1["content_block"]["type"], "thinking");
        assert_eq!(events[2].1["delta"]["thinking"], "hmm");
        assert_eq!(events[3].1["delta"]["signature"], "123");
        assert_eq!(events[4].0, "content_block_stop");
        assert_eq!(events[5].1["index"], 1);
        assert_eq!(events[5].1["content_block"]["type"], "text");
        assert_eq!(events.last().unwrap().0, "message_stop");
    }

    #[test]
    fn test_end_without_done_still_closes() {
        let mut handler = ChatToMessagesStream::new("m");
        let mut out = String::new();
        handler.on_line(r#"data: {"choices":[{"delta":{"content":"x"}}]}"#, &mut out);
        handler.on_end(&mut out);
        handler.on_end(&mut out);
        let events = parse_events(&out);
        assert_eq!(events.iter().filter(|(e, _)| e == "message_stop").count(), 1);
        assert_eq!(events[events.len() - 2].1["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn test_empty_stream_emits_nothing() {
        let mut handler = ChatToMessagesStream::new("m");
        let mut out = String::new();
        handler.on_line("data: [DONE]", &mut out);
        assert!(out.is_empty());
    }
}
