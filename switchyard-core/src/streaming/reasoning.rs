//! Lifting `<reasoning_content>` tags out of streamed content
//!
//! Models prompted to reason in-band wrap their thinking in
//! `<reasoning_content>...</reasoning_content>`. [`ReasoningExtractor`] walks
//! the content deltas of a Chat Completions stream and re-emits the tagged
//! text as `delta.thinking.content`, followed by a signature delta once the
//! closing tag is seen. Tags may be split across any number of chunks.

use super::{
    data_frame, data_payload, now_millis, rewrite_stream, ByteStream, SseLineHandler, SseRewriter,
    DONE_MARKER,
};
use serde_json::{json, Value};

pub const REASONING_START_TAG: &str = "<reasoning_content>";
pub const REASONING_END_TAG: &str = "</reasoning_content>";

/// Where the extractor is relative to the reasoning block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractorState {
    /// Waiting for the start tag
    #[default]
    Searching,
    /// Inside the reasoning block
    Reasoning,
    /// Past the end tag; content flows through
    Final,
}

/// Cross-chunk state machine for one stream
#[derive(Debug, Default)]
pub struct ReasoningExtractor {
    state: ExtractorState,
    /// Possible partial tag carried to the next chunk
    tag_buffer: String,
    /// Whitespace-only final content awaiting real text
    final_buffer: String,
    content_index: u64,
}

impl ReasoningExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    /// Index assigned to the block currently being emitted
    pub fn content_index(&self) -> u64 {
        self.content_index
    }

    /// Process one parsed chunk and return the chunks to emit in its place
    pub fn process(&mut self, chunk: Value) -> Vec<Value> {
        let content = chunk
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map(str::to_owned);

        match content {
            Some(content) => self.process_content(&chunk, content),
            None => self.passthrough(chunk).into_iter().collect(),
        }
    }

    /// Chunk owed when the stream ends, if the reasoning block never closed
    pub fn finish(&mut self) -> Option<Value> {
        if self.state != ExtractorState::Reasoning {
            return None;
        }
        self.state = ExtractorState::Final;
        Some(json!({
            "choices": [{"delta": {"thinking": {"signature": now_millis().to_string()}}}]
        }))
    }

    /// Non-content deltas keep flowing, stamped with the current block index
    fn passthrough(&self, mut chunk: Value) -> Option<Value> {
        let has_delta = chunk
            .pointer("/choices/0/delta")
            .and_then(Value::as_object)
            .is_some_and(|delta| !delta.is_empty());
        if !has_delta {
            return None;
        }
        if let Some(choice) = chunk.pointer_mut("/choices/0") {
            choice["index"] = json!(self.content_index);
        }
        Some(chunk)
    }

    fn process_content(&mut self, original: &Value, content: String) -> Vec<Value> {
        let mut out = Vec::new();
        let mut current = std::mem::take(&mut self.tag_buffer) + &content;

        while !current.is_empty() {
            match self.state {
                ExtractorState::Searching => {
                    if let Some(pos) = current.find(REASONING_START_TAG) {
                        current = current[pos + REASONING_START_TAG.len()..].to_string();
                        self.state = ExtractorState::Reasoning;
                    } else {
                        let keep = partial_tag_suffix(&current, REASONING_START_TAG);
                        self.tag_buffer = current[current.len() - keep..].to_string();
                        current.clear();
                    }
                }
                ExtractorState::Reasoning => {
                    if let Some(pos) = current.find(REASONING_END_TAG) {
                        if pos > 0 {
                            out.push(self.thinking_chunk(
                                original,
                                json!({"content": &current[..pos]}),
                            ));
                        }
                        out.push(self.thinking_chunk(
                            original,
                            json!({"signature": now_millis().to_string()}),
                        ));
                        self.content_index += 1;
                        current = current[pos + REASONING_END_TAG.len()..].to_string();
                        self.state = ExtractorState::Final;
                    } else {
                        let keep = partial_tag_suffix(&current, REASONING_END_TAG);
                        let split = current.len() - keep;
                        self.tag_buffer = current[split..].to_string();
                        if split > 0 {
                            out.push(self.thinking_chunk(
                                original,
                                json!({"content": &current[..split]}),
                            ));
                        }
                        current.clear();
                    }
                }
                ExtractorState::Final => {
                    if current.trim().is_empty() {
                        self.final_buffer.push_str(&current);
                    } else {
                        let text = std::mem::take(&mut self.final_buffer) + &current;
                        out.push(content_chunk(original, text));
                    }
                    current.clear();
                }
            }
        }

        out
    }

    fn thinking_chunk(&self, original: &Value, thinking: Value) -> Value {
        let mut chunk = original.clone();
        if let Some(choice) = chunk.pointer_mut("/choices/0") {
            if let Some(delta) = choice.get_mut("delta").and_then(Value::as_object_mut) {
                delta.remove("content");
                delta.insert("thinking".to_string(), thinking);
            }
            choice["index"] = json!(self.content_index);
        }
        chunk
    }
}

fn content_chunk(original: &Value, text: String) -> Value {
    let mut chunk = original.clone();
    if let Some(delta) = chunk
        .pointer_mut("/choices/0/delta")
        .and_then(Value::as_object_mut)
    {
        delta.remove("thinking");
        delta.insert("content".to_string(), Value::String(text));
    }
    chunk
}

/// Length of the longest proper prefix of `tag` that ends `text`
fn partial_tag_suffix(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&n| text.ends_with(&tag[..n]))
        .unwrap_or(0)
}

/// SSE adapter around [`ReasoningExtractor`]
#[derive(Debug, Default)]
pub struct ReasoningSseHandler {
    extractor: ReasoningExtractor,
}

impl SseLineHandler for ReasoningSseHandler {
    fn on_line(&mut self, line: &str, out: &mut String) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        match data_payload(trimmed) {
            Some(payload) if payload.trim() == DONE_MARKER => {
                out.push_str(trimmed);
                out.push_str("\n\n");
            }
            Some(payload) => match serde_json::from_str::<Value>(payload) {
                Ok(chunk) => {
                    for frame in self.extractor.process(chunk) {
                        out.push_str(&data_frame(&frame));
                    }
                }
                Err(_) => {
                    out.push_str(line);
                    out.push('\n');
                }
            },
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }

    fn on_end(&mut self, out: &mut String) {
        if let Some(frame) = self.extractor.finish() {
            out.push_str(&data_frame(&frame));
        }
    }
}

/// Rewrite a Chat Completions SSE stream, lifting tagged reasoning into thinking deltas
pub fn extract_reasoning_stream(input: ByteStream) -> ByteStream {
    rewrite_stream(input, SseRewriter::new(ReasoningSseHandler::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use bytes::Bytes;
    use futures::{stream, StreamExt};
    use proptest::prelude::*;

    fn delta(content: &str) -> Value {
        json!({"id": "c1", "choices": [{"index": 0, "delta": {"content": content}}]})
    }

    fn collect(extractor: &mut ReasoningExtractor, parts: &[&str]) -> (String, String) {
        let mut thinking = String::new();
        let mut content = String::new();
        for part in parts {
            for chunk in extractor.process(delta(part)) {
                if let Some(t) = chunk.pointer("/choices/0/delta/thinking/content") {
                    thinking.push_str(t.as_str().unwrap());
                }
                if let Some(c) = chunk.pointer("/choices/0/delta/content") {
                    content.push_str(c.as_str().unwrap());
                }
            }
        }
        (thinking, content)
    }

    #[test]
    fn test_start_tag_split_across_chunks() {
        let mut extractor = ReasoningExtractor::new();
        let (thinking, content) =
            collect(&mut extractor, &["<reason", "ing_content>X</reasoning_content>Y"]);
        assert_eq!(thinking, "X");
        assert_eq!(content, "Y");
        assert_eq!(extractor.state(), ExtractorState::Final);
    }

    #[test]
    fn test_signature_follows_reasoning_and_bumps_index() {
        let mut extractor = ReasoningExtractor::new();
        let out = extractor.process(delta("<reasoning_content>abc</reasoning_content>"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["choices"][0]["delta"]["thinking"]["content"], "abc");
        assert_eq!(out[0]["choices"][0]["index"], 0);
        assert!(out[1]["choices"][0]["delta"]["thinking"]["signature"].is_string());
        assert!(out[1]["choices"][0]["delta"].get("content").is_none());
        assert_eq!(extractor.content_index(), 1);
    }

    #[test]
    fn test_whitespace_coalesced_into_next_content() {
        let mut extractor = ReasoningExtractor::new();
        collect(&mut extractor, &["<reasoning_content>r</reasoning_content>"]);
        assert!(extractor.process(delta("\n\n")).is_empty());
        let out = extractor.process(delta("answer"));
        assert_eq!(out[0]["choices"][0]["delta"]["content"], "\n\nanswer");
    }

    #[test]
    fn test_non_content_delta_passes_with_index() {
        let mut extractor = ReasoningExtractor::new();
        let out = extractor.process(json!({
            "choices": [{"index": 7, "delta": {"role": "assistant"}}]
        }));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["choices"][0]["index"], 0);

        let empty = extractor.process(json!({"choices": [{"delta": {}}]}));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_unterminated_reasoning_gets_signature_on_finish() {
        let mut extractor = ReasoningExtractor::new();
        collect(&mut extractor, &["<reasoning_content>still thinking"]);
        let tail = extractor.finish().unwrap();
        assert!(tail["choices"][0]["delta"]["thinking"]["signature"].is_string());
        assert!(extractor.finish().is_none());
    }

    #[tokio::test]
    async fn test_sse_stream_end_to_end() {
        let frames = vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"<reasoning_con\"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\"tent>hm</reasoning_content>ok\"}}]}\n\n",
            ": keepalive\n",
            "data: [DONE]\n\n",
        ];
        let input: ByteStream = Box::pin(stream::iter(
            frames
                .into_iter()
                .map(|f| Ok::<_, GatewayError>(Bytes::from(f))),
        ));
        let out: Vec<Bytes> = extract_reasoning_stream(input)
            .map(Result::unwrap)
            .collect()
            .await;
        let text: String = out
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();

        assert!(text.contains("\"thinking\":{\"content\":\"hm\"}"));
        assert!(text.contains("\"content\":\"ok\""));
        assert!(text.contains(": keepalive\n"));
        assert!(text.ends_with("data: [DONE]\n\n"));
    }

    proptest! {
        #[test]
        fn prop_tag_boundaries_do_not_change_output(
            reasoning in "[a-z ]{0,20}",
            answer in "[a-z]{1,20}",
            cuts in proptest::collection::vec(0usize..80, 0..6),
        ) {
            let full = format!("{}{}{}{}", REASONING_START_TAG, reasoning, REASONING_END_TAG, answer);
            let mut points: Vec<usize> = cuts.into_iter().map(|c| c % (full.len() + 1)).collect();
            points.sort_unstable();
            points.dedup();

            let mut parts = Vec::new();
            let mut last = 0;
            for p in points {
                parts.push(&full[last..p]);
                last = p;
            }
            parts.push(&full[last..]);

            let mut extractor = ReasoningExtractor::new();
            let (thinking, content) = collect(&mut extractor, &parts);
            prop_assert_eq!(thinking, reasoning);
            prop_assert_eq!(content, answer);
        }
    }
}
