//! Streaming reshaping primitives
//!
//! Upstream bodies arrive as [`ByteStream`]s of SSE frames. The pieces here
//! rewrite them chunk by chunk without buffering whole responses:
//!
//! - [`rewrite_stream`] drives a stateful [`StreamRewriter`] over any stream
//! - [`SseRewriter`] adapts line-oriented [`SseLineHandler`]s to byte streams
//! - [`reasoning`] lifts `<reasoning_content>` tags into thinking deltas
//! - [`responses`] converts Responses API events to Chat Completions chunks
//! - [`tee_for_stats`] forks a stream for telemetry without backpressure

pub mod reasoning;
pub mod responses;
mod rewrite;
mod sse;
mod tee;
mod tool_args;

pub use reasoning::{extract_reasoning_stream, ExtractorState, ReasoningExtractor};
pub use responses::{convert_responses_stream, responses_to_chat, ResponsesStreamConverter};
pub use rewrite::{rewrite_stream, rewrite_with, StreamRewriter};
pub use sse::{
    data_frame, done_frame, event_frame, SseLineDecoder, SseLineHandler, SseRewriter, DONE_MARKER,
};
pub(crate) use sse::data_payload;
pub use tee::{tee_for_stats, DEFAULT_STATS_CAPACITY};
pub use tool_args::parse_tool_arguments;

use crate::error::GatewayError;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Boxed byte stream used for every streamed body in the gateway
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GatewayError>> + Send>>;

/// Current wall-clock time in milliseconds, used for synthetic signatures
pub(crate) fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Current wall-clock time in whole seconds
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
