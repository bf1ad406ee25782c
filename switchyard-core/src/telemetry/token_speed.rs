//! Token generation speed per request
//!
//! Streamed responses are teed: the client branch is returned untouched and
//! the stats branch is parsed by a background task. While the stream runs the
//! task reports a one-second sliding window rate every second. On
//! `message_stop` it reports the average rate over the whole request and
//! drops the request's entry.

use crate::router::{SessionUsageCache, Usage};
use crate::streaming::{data_payload, tee_for_stats, ByteStream, SseLineDecoder, DEFAULT_STATS_CAPACITY};
use crate::tokenizer::{estimate_tokens, Tokenizer};
use crate::transformers::RequestContext;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Running counters for one request
#[derive(Debug, Clone)]
pub struct TokenStats {
    pub request_id: Uuid,
    pub session_id: Option<String>,
    pub stream: bool,
    pub started_at: Instant,
    pub first_token_at: Option<Instant>,
    pub last_token_at: Instant,
    pub token_count: usize,
    /// `(arrival, tokens)` per counted delta, pruned to the sliding window
    token_batches: VecDeque<(Instant, usize)>,
    usage: Usage,
}

impl TokenStats {
    fn new(ctx: &RequestContext, stream: bool) -> Self {
        Self {
            request_id: ctx.request_id,
            session_id: ctx.session_id.clone(),
            stream,
            started_at: ctx.started_at,
            first_token_at: None,
            last_token_at: ctx.started_at,
            token_count: 0,
            token_batches: VecDeque::new(),
            usage: Usage::default(),
        }
    }

    fn add_tokens(&mut self, count: usize, now: Instant) {
        self.token_count += count;
        self.last_token_at = now;
        if count > 0 {
            self.token_batches.push_back((now, count));
        }
    }

    /// Tokens counted within the last window
    fn window_rate(&mut self, now: Instant) -> u64 {
        while self
            .token_batches
            .front()
            .is_some_and(|(t, _)| now.saturating_duration_since(*t) >= REPORT_INTERVAL)
        {
            self.token_batches.pop_front();
        }
        self.token_batches.iter().map(|(_, n)| *n as u64).sum()
    }

    /// Tokens per second from request start to the last token
    fn average_rate(&self) -> u64 {
        let secs = self
            .last_token_at
            .saturating_duration_since(self.started_at)
            .as_secs_f64();
        if secs > 0.0 {
            (self.token_count as f64 / secs).round() as u64
        } else {
            0
        }
    }

    fn report(&mut self, is_final: bool, now: Instant) -> SpeedReport {
        let tokens_per_second = if is_final {
            self.average_rate()
        } else {
            self.window_rate(now)
        };
        SpeedReport {
            request_id: self.request_id.simple().to_string()[..8].to_string(),
            session_id: self.session_id.clone(),
            stream: self.stream,
            token_count: self.token_count,
            tokens_per_second,
            time_to_first_token_ms: self
                .first_token_at
                .map(|t| t.saturating_duration_since(self.started_at).as_millis() as u64),
            duration_ms: self
                .last_token_at
                .saturating_duration_since(self.started_at)
                .as_millis() as u64,
            is_final,
        }
    }
}

/// One speed sample handed to a [`StatsSink`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeedReport {
    /// First eight hex digits of the request id
    pub request_id: String,
    pub session_id: Option<String>,
    pub stream: bool,
    pub token_count: usize,
    pub tokens_per_second: u64,
    pub time_to_first_token_ms: Option<u64>,
    pub duration_ms: u64,
    pub is_final: bool,
}

/// Destination for speed reports
pub trait StatsSink: Send + Sync {
    fn report(&self, report: &SpeedReport);
}

/// Emits reports as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatsSink;

impl StatsSink for TracingStatsSink {
    fn report(&self, report: &SpeedReport) {
        let prefix = if report.is_final {
            "[Token Speed Final]"
        } else {
            "[Token Speed]"
        };
        info!(
            request_id = %report.request_id,
            session_id = report.session_id.as_deref().unwrap_or("-"),
            stream = report.stream,
            token_count = report.token_count,
            tokens_per_second = report.tokens_per_second,
            ttft_ms = report.time_to_first_token_ms,
            duration_ms = report.duration_ms,
            "{}",
            prefix
        );
    }
}

/// Tracks in-flight requests and reports their token speed
pub struct TokenSpeedMonitor {
    stats: DashMap<Uuid, TokenStats>,
    sink: Arc<dyn StatsSink>,
    usage: Arc<SessionUsageCache>,
}

impl TokenSpeedMonitor {
    pub fn new(sink: Arc<dyn StatsSink>, usage: Arc<SessionUsageCache>) -> Arc<Self> {
        Arc::new(Self {
            stats: DashMap::new(),
            sink,
            usage,
        })
    }

    /// Requests currently being measured
    pub fn active(&self) -> usize {
        self.stats.len()
    }

    /// Start measuring a streamed body and return the client branch
    ///
    /// Must be called inside a tokio runtime; the stats branch runs on its
    /// own task and never holds up the returned stream.
    pub fn observe_stream(
        self: &Arc<Self>,
        ctx: &RequestContext,
        tokenizer: Option<Arc<dyn Tokenizer>>,
        body: ByteStream,
    ) -> ByteStream {
        let (client, rx) = tee_for_stats(body, DEFAULT_STATS_CAPACITY);
        let guard = self.track(ctx, true);
        tokio::spawn(consume(guard, rx, tokenizer));
        client
    }

    /// Record a buffered response: usage for the session and a final report
    pub fn record_response(
        &self,
        ctx: &RequestContext,
        body: &Value,
        tokenizer: Option<&dyn Tokenizer>,
    ) {
        let usage = body.get("usage").and_then(Usage::from_value);
        if let (Some(session), Some(usage)) = (&ctx.session_id, usage) {
            self.usage.put(session.clone(), usage);
        }

        let token_count = match usage.filter(|u| u.output_tokens > 0) {
            Some(usage) => usage.output_tokens as usize,
            None => response_text(body).map_or(0, |text| count_text(tokenizer, &text)),
        };
        if token_count == 0 {
            return;
        }

        let now = Instant::now();
        let mut stats = TokenStats::new(ctx, false);
        stats.add_tokens(token_count, now);
        stats.first_token_at = Some(now);
        self.sink.report(&stats.report(true, now));
    }

    fn track(self: &Arc<Self>, ctx: &RequestContext, stream: bool) -> StatsGuard {
        self.stats.insert(ctx.request_id, TokenStats::new(ctx, stream));
        StatsGuard {
            monitor: Arc::clone(self),
            request_id: ctx.request_id,
        }
    }

    fn emit(&self, request_id: &Uuid, is_final: bool) {
        let report = match self.stats.get_mut(request_id) {
            Some(mut stats) => stats.report(is_final, Instant::now()),
            None => return,
        };
        self.sink.report(&report);
    }
}

/// Removes the request's entry however the stats task ends
struct StatsGuard {
    monitor: Arc<TokenSpeedMonitor>,
    request_id: Uuid,
}

impl Drop for StatsGuard {
    fn drop(&mut self) {
        self.monitor.stats.remove(&self.request_id);
    }
}

async fn consume(
    guard: StatsGuard,
    mut rx: mpsc::Receiver<Bytes>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
) {
    let mut parser = EventParser::new(guard, tokenizer);
    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(chunk) => {
                    if parser.push(&chunk) {
                        return;
                    }
                }
                None => {
                    debug!(
                        "Stream ended before message_stop [request_id: {}]",
                        parser.guard.request_id
                    );
                    return;
                }
            },
            _ = ticker.tick() => parser.guard.monitor.emit(&parser.guard.request_id, false),
        }
    }
}

/// Minimal SSE event reader for the stats branch
struct EventParser {
    guard: StatsGuard,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    decoder: SseLineDecoder,
    event: Option<String>,
}

impl EventParser {
    fn new(guard: StatsGuard, tokenizer: Option<Arc<dyn Tokenizer>>) -> Self {
        Self {
            guard,
            tokenizer,
            decoder: SseLineDecoder::new(),
            event: None,
        }
    }

    /// Feed a chunk; true once `message_stop` has been handled
    fn push(&mut self, chunk: &[u8]) -> bool {
        for line in self.decoder.push(chunk) {
            if line.is_empty() {
                self.event = None;
            } else if let Some(name) = line.strip_prefix("event:") {
                self.event = Some(name.trim().to_string());
            } else if let Some(payload) = data_payload(&line) {
                let Ok(data) = serde_json::from_str::<Value>(payload) else {
                    continue;
                };
                let event = self
                    .event
                    .take()
                    .or_else(|| data.get("type").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_default();
                if self.on_event(&event, &data) {
                    return true;
                }
            }
        }
        false
    }

    fn on_event(&mut self, event: &str, data: &Value) -> bool {
        let monitor = &self.guard.monitor;
        let request_id = self.guard.request_id;
        let now = Instant::now();

        match event {
            "content_block_start" | "content_block_delta" => {
                let Some(mut stats) = monitor.stats.get_mut(&request_id) else {
                    return false;
                };
                if stats.first_token_at.is_none() {
                    stats.first_token_at = Some(now);
                }
                if event == "content_block_delta" {
                    if let Some(text) = delta_text(data).filter(|t| !t.is_empty()) {
                        let count = count_text(self.tokenizer.as_deref(), text);
                        stats.add_tokens(count, now);
                    }
                }
            }
            "message_start" => {
                if let Some(usage) = data.pointer("/message/usage").and_then(Usage::from_value) {
                    if let Some(mut stats) = monitor.stats.get_mut(&request_id) {
                        stats.usage.input_tokens = usage.input_tokens;
                    }
                }
            }
            "message_delta" => {
                let Some(usage) = data.get("usage").and_then(Usage::from_value) else {
                    return false;
                };
                let Some(mut stats) = monitor.stats.get_mut(&request_id) else {
                    return false;
                };
                if usage.input_tokens > 0 {
                    stats.usage.input_tokens = usage.input_tokens;
                }
                stats.usage.output_tokens = usage.output_tokens;
                let session_usage = stats.session_id.clone().map(|s| (s, stats.usage));
                drop(stats);
                if let Some((session, usage)) = session_usage {
                    monitor.usage.put(session, usage);
                }
            }
            "message_stop" => {
                monitor.emit(&request_id, true);
                return true;
            }
            _ => {}
        }
        false
    }
}

/// Generated text carried by a `content_block_delta`
fn delta_text(data: &Value) -> Option<&str> {
    let delta = data.get("delta")?;
    let field = match delta.get("type").and_then(Value::as_str)? {
        "text_delta" => "text",
        "input_json_delta" => "partial_json",
        "thinking_delta" => "thinking",
        _ => return None,
    };
    delta.get(field).and_then(Value::as_str)
}

fn count_text(tokenizer: Option<&dyn Tokenizer>, text: &str) -> usize {
    tokenizer
        .and_then(|t| t.encode_text(text))
        .map_or_else(|| estimate_tokens(text), |ids| ids.len())
}

/// Text blocks of a buffered Messages response
fn response_text(body: &Value) -> Option<String> {
    let content = body
        .get("content")
        .or_else(|| body.pointer("/message/content"))?;
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => Some(
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use futures::{stream, StreamExt};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<SpeedReport>>);

    impl StatsSink for RecordingSink {
        fn report(&self, report: &SpeedReport) {
            self.0.lock().unwrap().push(report.clone());
        }
    }

    fn context(session: Option<&str>) -> RequestContext {
        let mut ctx = RequestContext::new("/v1/messages").with_target("p", "m");
        ctx.session_id = session.map(str::to_string);
        ctx.stream = true;
        ctx
    }

    fn anthropic_events() -> Vec<Result<Bytes, GatewayError>> {
        let frames = [
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":42,\"output_tokens\":0}}}\n\n",
            "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"abcdefgh\"}}\n\n",
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"abcd\"}}\n\n",
            "event: message_delta\ndata: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":3}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        ];
        frames.iter().map(|f| Ok(Bytes::from(*f))).collect()
    }

    async fn wait_idle(monitor: &TokenSpeedMonitor) {
        for _ in 0..100 {
            if monitor.active() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stats entry was not removed");
    }

    #[tokio::test]
    async fn test_stream_reports_final_and_feeds_usage() {
        let sink = Arc::new(RecordingSink::default());
        let usage = Arc::new(SessionUsageCache::default());
        let monitor = TokenSpeedMonitor::new(sink.clone(), usage.clone());

        let body: ByteStream = Box::pin(stream::iter(anthropic_events()));
        let client = monitor.observe_stream(&context(Some("s1")), None, body);
        let forwarded: Vec<_> = client.collect().await;
        assert_eq!(forwarded.len(), 6);

        wait_idle(&monitor).await;
        let reports = sink.0.lock().unwrap();
        let last = reports.last().unwrap();
        assert!(last.is_final);
        // "abcdefgh" and "abcd" by the 4-chars-per-token estimate
        assert_eq!(last.token_count, 3);
        assert!(last.time_to_first_token_ms.is_some());
        assert_eq!(
            usage.get("s1"),
            Some(Usage {
                input_tokens: 42,
                output_tokens: 3
            })
        );
    }

    #[tokio::test]
    async fn test_entry_removed_when_stream_ends_early() {
        let sink = Arc::new(RecordingSink::default());
        let monitor = TokenSpeedMonitor::new(sink.clone(), Arc::new(SessionUsageCache::default()));

        let mut events = anthropic_events();
        events.truncate(3);
        let body: ByteStream = Box::pin(stream::iter(events));
        let client = monitor.observe_stream(&context(None), None, body);
        assert_eq!(monitor.active(), 1);
        drop(client);

        wait_idle(&monitor).await;
        assert!(sink.0.lock().unwrap().iter().all(|r| !r.is_final));
    }

    #[test]
    fn test_window_rate_drops_old_tokens() {
        let ctx = context(None);
        let mut stats = TokenStats::new(&ctx, true);
        let start = Instant::now();
        stats.add_tokens(5, start);
        stats.add_tokens(3, start + Duration::from_millis(1500));
        assert_eq!(stats.window_rate(start + Duration::from_millis(1600)), 3);
        assert_eq!(stats.token_count, 8);
    }

    #[test]
    fn test_large_delta_is_one_window_entry() {
        let ctx = context(None);
        let mut stats = TokenStats::new(&ctx, true);
        let start = Instant::now();
        stats.add_tokens(50_000, start);
        stats.add_tokens(0, start + Duration::from_millis(10));
        stats.add_tokens(2, start + Duration::from_millis(20));
        assert_eq!(stats.token_batches.len(), 2);
        assert_eq!(stats.window_rate(start + Duration::from_millis(500)), 50_002);
        assert_eq!(stats.window_rate(start + Duration::from_millis(1010)), 2);
    }

    #[test]
    fn test_delta_text_kinds() {
        let text = json!({"delta": {"type": "text_delta", "text": "a"}});
        let json_delta = json!({"delta": {"type": "input_json_delta", "partial_json": "{\"x\""}});
        let signature = json!({"delta": {"type": "signature_delta", "signature": "s"}});
        assert_eq!(delta_text(&text), Some("a"));
        assert_eq!(delta_text(&json_delta), Some("{\"x\""));
        assert_eq!(delta_text(&signature), None);
    }

    #[test]
    fn test_buffered_response_prefers_usage() {
        let sink = Arc::new(RecordingSink::default());
        let usage = Arc::new(SessionUsageCache::default());
        let monitor = TokenSpeedMonitor::new(sink.clone(), usage.clone());

        let body = json!({
            "content": [{"type": "text", "text": "hello"}],
            "usage": {"input_tokens": 10, "output_tokens": 7}
        });
        monitor.record_response(&context(Some("s2")), &body, None);
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].token_count, 7);
        assert!(!reports[0].stream);
        assert_eq!(usage.get("s2").map(|u| u.input_tokens), Some(10));
    }
}
