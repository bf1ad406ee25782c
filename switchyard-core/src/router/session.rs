//! Session identity and per-session usage memory

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

/// Separator between the user part and the session id in `metadata.user_id`
pub const SESSION_MARKER: &str = "_session_";

pub const DEFAULT_SESSION_CAPACITY: usize = 100;

/// Session id: the text after the first `_session_` in `user_id`
pub fn parse_session_id(user_id: &str) -> Option<&str> {
    user_id
        .split_once(SESSION_MARKER)
        .map(|(_, session)| session)
        .filter(|s| !s.is_empty())
}

/// Session id carried by a raw request body, if any
pub fn session_id_of(body: &Value) -> Option<String> {
    body.pointer("/metadata/user_id")
        .and_then(Value::as_str)
        .and_then(parse_session_id)
        .map(str::to_string)
}

/// Token usage of one completed turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Read a usage object in either Messages or Chat Completions naming
    pub fn from_value(usage: &Value) -> Option<Self> {
        let field = |a: &str, b: &str| {
            usage
                .get(a)
                .or_else(|| usage.get(b))
                .and_then(Value::as_u64)
        };
        let input_tokens = field("input_tokens", "prompt_tokens");
        let output_tokens = field("output_tokens", "completion_tokens");
        if input_tokens.is_none() && output_tokens.is_none() {
            return None;
        }
        Some(Self {
            input_tokens: input_tokens.unwrap_or(0),
            output_tokens: output_tokens.unwrap_or(0),
        })
    }
}

/// Bounded memory of each session's previous turn usage
#[derive(Debug)]
pub struct SessionUsageCache {
    entries: Mutex<LruCache<String, Usage>>,
}

impl SessionUsageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Usage> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .copied()
    }

    pub fn put(&self, session_id: impl Into<String>, usage: Usage) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(session_id.into(), usage);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionUsageCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}
