use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const LABEL_MAX_CHARS: usize = 40;

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid json regex"));

/// Best-effort label extraction from free-form model output: the first
/// `{...}` span with a string `label` field wins, otherwise the first line.
pub fn extract_label(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    if let Some(found) = JSON_OBJECT.find(text) {
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(found.as_str()) {
            if let Some(Value::String(label)) = object.get("label") {
                return sanitize_label(label);
            }
        }
    }

    let first_line = text.split('\n').next().unwrap_or_default();
    sanitize_label(first_line)
}

pub fn sanitize_label(label: &str) -> Option<String> {
    let trimmed = label.trim();
    let unquoted = trimmed.strip_prefix('"').unwrap_or(trimmed);
    let unquoted = unquoted.strip_suffix('"').unwrap_or(unquoted);
    let cleaned: String = unquoted
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .take(LABEL_MAX_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}
