//! Lenient accessors for model-produced JSON.
//!
//! Models are asked for a JSON object but are free to return anything, so no
//! field is trusted: every accessor returns `None` on a missing or
//! wrongly-typed value and the caller picks the default.

use serde_json::{Map, Value};

/// Parse a JSON object, tolerating a surrounding markdown code fence.
pub fn parse_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = strip_fence(text.trim());
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(body) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`) on the opening fence
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// `true`/`false` or the strings `"true"`/`"false"`
pub fn bool_field(object: &Map<String, Value>, key: &str) -> Option<bool> {
    match object.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Non-blank string, trimmed
pub fn str_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// A finite number, given as a JSON number or a numeric string
pub fn number_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

pub fn number_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    object.get(key).and_then(number_value)
}

/// Array of strings; non-strings and blank entries are dropped, a non-array
/// yields an empty list.
pub fn string_list_field(object: &Map<String, Value>, key: &str) -> Vec<String> {
    match object.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
