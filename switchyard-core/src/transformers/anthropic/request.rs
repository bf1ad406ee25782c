//! Anthropic Messages request to the unified chat shape

use serde_json::{json, Map, Value};

/// Scalar fields copied as-is
const PASSTHROUGH_FIELDS: &[&str] = &["model", "max_tokens", "temperature", "top_p", "stream"];

/// Convert an inbound Messages body into a unified chat request
pub(super) fn to_unified(body: Value) -> Result<Value, String> {
    let Value::Object(mut req) = body else {
        return Err("request body must be a JSON object".to_string());
    };

    let mut out = Map::new();
    for field in PASSTHROUGH_FIELDS {
        if let Some(value) = req.remove(*field) {
            out.insert(field.to_string(), value);
        }
    }
    if let Some(stop) = req.remove("stop_sequences") {
        out.insert("stop".to_string(), stop);
    }

    let mut messages = Vec::new();
    if let Some(system) = req.remove("system") {
        if let Some(message) = convert_system(system) {
            messages.push(message);
        }
    }

    let inbound = match req.remove("messages") {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err("'messages' must be an array".to_string()),
    };
    for message in inbound {
        let role = message
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let content = message.get("content").cloned().unwrap_or(Value::Null);
        match role.as_str() {
            "user" => convert_user(content, &mut messages),
            "assistant" => messages.push(convert_assistant(content)),
            other => return Err(format!("unsupported message role '{}'", other)),
        }
    }
    out.insert("messages".to_string(), Value::Array(messages));

    if let Some(Value::Array(tools)) = req.remove("tools") {
        let tools: Vec<Value> = tools.iter().map(convert_tool).collect();
        if !tools.is_empty() {
            out.insert("tools".to_string(), Value::Array(tools));
        }
    }
    if let Some(choice) = req.remove("tool_choice") {
        if let Some(choice) = convert_tool_choice(&choice) {
            out.insert("tool_choice".to_string(), choice);
        }
    }
    if let Some(thinking) = req.remove("thinking") {
        if let Some(reasoning) = convert_thinking(&thinking) {
            out.insert("reasoning".to_string(), reasoning);
        }
    }

    Ok(Value::Object(out))
}

fn convert_system(system: Value) -> Option<Value> {
    match system {
        Value::String(text) if !text.is_empty() => Some(json!({"role": "system", "content": text})),
        Value::Array(blocks) => {
            let parts: Vec<Value> = blocks
                .into_iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .map(|b| text_part(&b))
                .collect();
            (!parts.is_empty()).then(|| json!({"role": "system", "content": parts}))
        }
        _ => None,
    }
}

/// Tool results become `tool` messages ahead of any remaining user content
fn convert_user(content: Value, messages: &mut Vec<Value>) {
    let blocks = match content {
        Value::Array(blocks) => blocks,
        Value::String(text) => {
            messages.push(json!({"role": "user", "content": text}));
            return;
        }
        _ => return,
    };

    let mut parts = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("tool_result") => messages.push(json!({
                "role": "tool",
                "tool_call_id": block.get("tool_use_id").cloned().unwrap_or(Value::Null),
                "content": tool_result_text(block.get("content")),
            })),
            Some("text") => parts.push(text_part(&block)),
            Some("image") => {
                if let Some(part) = image_part(&block) {
                    parts.push(part);
                }
            }
            other => tracing::debug!("Dropping user block of type {:?}", other),
        }
    }
    if !parts.is_empty() {
        messages.push(json!({"role": "user", "content": parts}));
    }
}

fn convert_assistant(content: Value) -> Value {
    let blocks = match content {
        Value::Array(blocks) => blocks,
        Value::String(text) => return json!({"role": "assistant", "content": text}),
        _ => return json!({"role": "assistant", "content": Value::Null}),
    };

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    let mut thinking = None;
    for block in &blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default()),
            Some("thinking") => {
                let mut t = Map::new();
                if let Some(content) = block.get("thinking") {
                    t.insert("content".to_string(), content.clone());
                }
                if let Some(signature) = block.get("signature") {
                    t.insert("signature".to_string(), signature.clone());
                }
                thinking = Some(Value::Object(t));
            }
            Some("tool_use") => {
                let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                tool_calls.push(json!({
                    "id": block.get("id").cloned().unwrap_or(Value::Null),
                    "type": "function",
                    "function": {
                        "name": block.get("name").cloned().unwrap_or(Value::Null),
                        "arguments": input.to_string(),
                    }
                }));
            }
            _ => {}
        }
    }

    let mut message = Map::new();
    message.insert("role".to_string(), json!("assistant"));
    message.insert(
        "content".to_string(),
        if text.is_empty() { Value::Null } else { Value::String(text) },
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".to_string(), Value::Array(tool_calls));
    }
    if let Some(thinking) = thinking {
        message.insert("thinking".to_string(), thinking);
    }
    Value::Object(message)
}

fn text_part(block: &Value) -> Value {
    let mut part = Map::new();
    part.insert("type".to_string(), json!("text"));
    part.insert(
        "text".to_string(),
        block.get("text").cloned().unwrap_or_else(|| json!("")),
    );
    if let Some(cache) = block.get("cache_control") {
        part.insert("cache_control".to_string(), cache.clone());
    }
    Value::Object(part)
}

fn image_part(block: &Value) -> Option<Value> {
    let source = block.get("source")?;
    let media_type = source.get("media_type").and_then(Value::as_str);
    let url = match source.get("type").and_then(Value::as_str) {
        Some("base64") => format!(
            "data:{};base64,{}",
            media_type.unwrap_or("image/png"),
            source.get("data").and_then(Value::as_str)?
        ),
        Some("url") => source.get("url").and_then(Value::as_str)?.to_string(),
        _ => return None,
    };
    let mut part = json!({"type": "image_url", "image_url": {"url": url}});
    if let Some(media_type) = media_type {
        part["media_type"] = json!(media_type);
    }
    Some(part)
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .map(|b| match b.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => b.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

fn convert_tool(tool: &Value) -> Value {
    let kind = tool.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind.starts_with("web_search") {
        return json!({
            "type": "function",
            "function": {
                "name": "web_search",
                "description": "Search the web for up-to-date information",
                "parameters": {
                    "type": "object",
                    "properties": {"query": {"type": "string"}},
                    "required": ["query"]
                }
            }
        });
    }

    let mut function = Map::new();
    function.insert(
        "name".to_string(),
        tool.get("name").cloned().unwrap_or_else(|| json!("")),
    );
    if let Some(description) = tool.get("description") {
        function.insert("description".to_string(), description.clone());
    }
    function.insert(
        "parameters".to_string(),
        tool.get("input_schema")
            .cloned()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
    );
    json!({"type": "function", "function": function})
}

fn convert_tool_choice(choice: &Value) -> Option<Value> {
    match choice.get("type").and_then(Value::as_str)? {
        "auto" => Some(json!("auto")),
        "any" => Some(json!("required")),
        "none" => Some(json!("none")),
        "tool" => {
            let name = choice.get("name")?.clone();
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}

fn convert_thinking(thinking: &Value) -> Option<Value> {
    match thinking.get("type").and_then(Value::as_str) {
        Some("enabled") => {
            let mut reasoning = json!({"enabled": true, "effort": "high"});
            if let Some(budget) = thinking.get("budget_tokens").and_then(Value::as_u64) {
                reasoning["max_tokens"] = json!(budget);
            }
            Some(reasoning)
        }
        Some("disabled") => Some(json!({"enabled": false})),
        _ => None,
    }
}
