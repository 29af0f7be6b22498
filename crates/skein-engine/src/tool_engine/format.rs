use serde_json::{Map, Value};

/// Text handed back to the model for a tool's payload.
pub fn format_tool_response(payload: Option<&Value>) -> String {
    match payload {
        None | Some(Value::Null) => "none".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Object(_) | Value::Array(_))) => {
            serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
        }
        Some(other) => other.to_string(),
    }
}

/// Keep the first and last `keep` characters of `text`.
pub fn preview(text: &str, keep: usize) -> String {
    let total = text.chars().count();
    if total <= keep * 2 {
        return text.to_string();
    }
    let head: String = text.chars().take(keep).collect();
    let tail: String = text.chars().skip(total - keep).collect();
    format!("{head}\n...[hide {} chars]...\n{tail}", total - keep * 2)
}

/// Lenient parse of model-produced arguments; anything that is not an
/// object becomes empty.
pub fn parse_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match json5::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
