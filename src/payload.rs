#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Helpers for reading loosely structured model output.
//!
//! Models wrap JSON in markdown fences, in `<result>` tags, or return numbers
//! as strings. Everything here normalizes those shapes so the schema
//! boundaries in `assignment`, `submission` and `grade` only deal with
//! `serde_json::Value`.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::SchemaValidationError;

/// Returns the body of the first `<tag>...</tag>` section, trimmed.
pub fn section<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

/// Strips a markdown code fence (```json or bare ```) around `text`, if any.
fn strip_fence(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        return match body.find("```") {
            Some(end) => body[..end].trim(),
            None => body.trim(),
        };
    }

    let mut trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        trimmed = rest.trim_start();
    }
    if let Some(rest) = trimmed.strip_suffix("```") {
        trimmed = rest.trim_end();
    }
    trimmed
}

/// Extracts a JSON value from raw model text.
///
/// Looks inside a `<result>` section first, then strips code fences, then
/// falls back to the outermost `{...}` span.
pub fn extract_json(text: &str) -> Result<Value, SchemaValidationError> {
    let body = section(text, "result").unwrap_or(text);
    let body = strip_fence(body);

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&body[start..=end])
            .map_err(|e| SchemaValidationError::NotJson(e.to_string())),
        _ => {
            let preview: String = body.chars().take(200).collect();
            Err(SchemaValidationError::NotJson(format!("no JSON object in `{preview}`")))
        }
    }
}

/// Reads a non-empty string from `value`; numbers are stringified.
pub fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads an optional string field, treating empty strings as absent.
pub fn opt_text(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    text(obj.get(key))
}

/// Reads a required string field.
pub fn required_text(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    record: &str,
) -> Result<String, SchemaValidationError> {
    opt_text(obj, key).ok_or_else(|| SchemaValidationError::missing(record, key))
}

/// Reads a list of strings. A lone string becomes a one-element list, nested
/// objects are kept as compact JSON, and anything missing becomes empty.
pub fn string_list(obj: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::Object(_) | Value::Array(_) => Some(item.to_string()),
                other => text(Some(other)),
            })
            .collect(),
        Some(single) => text(Some(single)).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Reads a string→string map. Arrays of strings are accepted and keyed by
/// position so evidence is never lost.
pub fn string_map(obj: &serde_json::Map<String, Value>, key: &str) -> BTreeMap<String, String> {
    match obj.get(key) {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(k, v)| text(Some(v)).map(|v| (k.clone(), v)))
            .collect(),
        Some(Value::Array(_)) => string_list(obj, key)
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("excerpt_{}", i + 1), v))
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Reads a finite number; numeric strings such as `"7.5"` or `"8/10"` are
/// accepted (the part before `/` is used).
pub fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let head = s.split('/').next().unwrap_or_default().trim();
            head.parse::<f64>().ok()
        }
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

/// Returns `value` as an object or a `NotAnObject` error naming `record`.
pub fn object<'a>(
    value: &'a Value,
    record: &str,
) -> Result<&'a serde_json::Map<String, Value>, SchemaValidationError> {
    value
        .as_object()
        .ok_or_else(|| SchemaValidationError::NotAnObject(record.to_string()))
}
