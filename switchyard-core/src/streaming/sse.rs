//! SSE framing helpers and a line-oriented rewriter

use super::rewrite::StreamRewriter;
use crate::error::GatewayError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

/// Terminal SSE payload
pub const DONE_MARKER: &str = "[DONE]";

/// Encode a value as a `data: <json>\n\n` frame
pub fn data_frame<T: Serialize>(value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => format!("data: {}\n\n", json),
        Err(e) => {
            tracing::warn!("Dropping unserializable SSE payload: {}", e);
            String::new()
        }
    }
}

/// Encode a named event frame
pub fn event_frame<T: Serialize>(event: &str, value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(json) => format!("event: {}\ndata: {}\n\n", event, json),
        Err(e) => {
            tracing::warn!("Dropping unserializable SSE event '{}': {}", event, e);
            String::new()
        }
    }
}

pub fn done_frame() -> String {
    format!("data: {}\n\n", DONE_MARKER)
}

/// Splits a byte stream into text lines across chunk boundaries
///
/// Lines end at `\n`; a trailing `\r` is dropped. Splitting on the newline
/// byte never cuts a UTF-8 sequence, so multi-byte characters that straddle
/// chunks are reassembled intact.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Return any unterminated trailing text
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(rest)
    }
}

/// Line-level transform plugged into [`SseRewriter`]
pub trait SseLineHandler: Send {
    /// Handle one complete line, appending any output frames to `out`
    fn on_line(&mut self, line: &str, out: &mut String);

    /// Handle the unterminated remainder left when the input ends
    fn on_trailing(&mut self, rest: &str, out: &mut String) {
        self.on_line(rest, out);
    }

    /// Append frames owed after the input ends
    fn on_end(&mut self, _out: &mut String) {}
}

/// Byte-stream rewriter that feeds complete lines to a [`SseLineHandler`]
pub struct SseRewriter<H> {
    decoder: SseLineDecoder,
    handler: H,
}

impl<H: SseLineHandler> SseRewriter<H> {
    pub fn new(handler: H) -> Self {
        Self {
            decoder: SseLineDecoder::new(),
            handler,
        }
    }
}

fn non_empty(out: String) -> Option<Bytes> {
    if out.is_empty() {
        None
    } else {
        Some(Bytes::from(out))
    }
}

#[async_trait]
impl<H: SseLineHandler> StreamRewriter for SseRewriter<H> {
    type Input = Bytes;
    type Output = Bytes;

    async fn rewrite(&mut self, chunk: Bytes) -> Result<Option<Bytes>, GatewayError> {
        let mut out = String::new();
        for line in self.decoder.push(&chunk) {
            self.handler.on_line(&line, &mut out);
        }
        Ok(non_empty(out))
    }

    async fn finish(&mut self) -> Result<Option<Bytes>, GatewayError> {
        let mut out = String::new();
        if let Some(rest) = self.decoder.finish() {
            if !rest.trim().is_empty() {
                self.handler.on_trailing(&rest, &mut out);
            }
        }
        self.handler.on_end(&mut out);
        Ok(non_empty(out))
    }
}

/// Payload of a `data:` line, with one optional leading space removed
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::rewrite_stream;
    use futures::{stream, StreamExt};
    use serde_json::json;

    #[test]
    fn test_decoder_joins_split_lines() {
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\ndata: x"), vec!["data: {\"a\":1}", ""]);
        assert_eq!(decoder.finish().as_deref(), Some("data: x"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_reassembles_multibyte_characters() {
        let text = "data: 你好\n".as_bytes();
        let (a, b) = text.split_at(8);
        let mut decoder = SseLineDecoder::new();
        assert!(decoder.push(a).is_empty());
        assert_eq!(decoder.push(b), vec!["data: 你好"]);
    }

    #[test]
    fn test_frames() {
        assert_eq!(data_frame(&json!({"a": 1})), "data: {\"a\":1}\n\n");
        assert_eq!(done_frame(), "data: [DONE]\n\n");
        assert_eq!(
            event_frame("ping", &json!({})),
            "event: ping\ndata: {}\n\n"
        );
        assert_eq!(data_payload("data:{}"), Some("{}"));
        assert_eq!(data_payload("data: {}"), Some("{}"));
        assert_eq!(data_payload("event: x"), None);
    }

    struct Upper;

    impl SseLineHandler for Upper {
        fn on_line(&mut self, line: &str, out: &mut String) {
            if !line.is_empty() {
                out.push_str(&line.to_uppercase());
                out.push('\n');
            }
        }

        fn on_end(&mut self, out: &mut String) {
            out.push_str("END\n");
        }
    }

    #[tokio::test]
    async fn test_sse_rewriter_flushes_trailing_and_end() {
        let input = stream::iter(vec![
            Ok(Bytes::from_static(b"ab\nc")),
            Ok(Bytes::from_static(b"d")),
        ]);
        let out: Vec<Bytes> = rewrite_stream(input, SseRewriter::new(Upper))
            .map(Result::unwrap)
            .collect()
            .await;
        let text: String = out
            .iter()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .collect();
        assert_eq!(text, "AB\nCD\nEND\n");
    }
}
