//! Tolerant parsing of streamed tool-call arguments
//!
//! Models occasionally emit arguments that are not strict JSON: trailing
//! commas, single quotes, or truncated objects. Parsing degrades through
//! strict JSON, JSON5, and structural repair before settling on `{}`. It
//! never fails.

use jsonrepair::{repair_json, Options};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Parse tool arguments into a JSON object
pub fn parse_tool_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return empty();
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }

    if let Ok(value @ Value::Object(_)) = json5::from_str::<Value>(trimmed) {
        debug!("Tool arguments parsed with relaxed syntax");
        return value;
    }

    match repair_json(trimmed, &Options::default()) {
        Ok(repaired) => {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&repaired) {
                debug!("Tool arguments repaired: {} -> {}", trimmed, repaired);
                return value;
            }
        }
        Err(e) => debug!("Tool argument repair failed: {}", e),
    }

    warn!("Unparseable tool arguments, substituting empty object");
    empty()
}

fn empty() -> Value {
    Value::Object(Map::new())
}
