//! Tolerant extraction of JSON and code from free-form model replies.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

fn fenced_json() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").ok())
        .as_ref()
}

fn fenced_any() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n?(.*?)```").ok())
        .as_ref()
}

/// First JSON value found in `text`.
///
/// Tries, in order: the whole reply, a ```json fence, any fence, then the
/// widest `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    for caps in fenced_json().into_iter().flat_map(|re| re.captures_iter(text)) {
        if let Ok(value) = serde_json::from_str(caps[1].trim()) {
            return Some(value);
        }
    }
    for caps in fenced_any().into_iter().flat_map(|re| re.captures_iter(text)) {
        if let Ok(value) = serde_json::from_str(caps[2].trim()) {
            return Some(value);
        }
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&text[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Like [`extract_json`] but only accepts an object.
pub fn extract_object(text: &str) -> Option<Map<String, Value>> {
    match extract_json(text)? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Body of the first fenced code block, preferring non-JSON fences.
pub fn extract_code_block(text: &str) -> Option<String> {
    let mut fallback = None;
    for caps in fenced_any().into_iter().flat_map(|re| re.captures_iter(text)) {
        let body = caps[2].trim();
        if body.is_empty() {
            continue;
        }
        if caps[1].eq_ignore_ascii_case("json") {
            fallback.get_or_insert_with(|| body.to_string());
        } else {
            return Some(body.to_string());
        }
    }
    fallback
}

/// Lenient field readers for model-produced objects.
pub(crate) fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

pub(crate) fn bool_field(map: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "pass" | "passed" => Some(true),
            "false" | "no" | "fail" | "failed" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    })
}

pub(crate) fn number_field(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_json() {
        assert_eq!(extract_json(r#" {"a": 1} "#), Some(json!({"a": 1})));
    }

    #[test]
    fn parses_fenced_json_with_prose() {
        let text = "Here you go:\n```json\n{\"passed\": false}\n```\nThanks";
        assert_eq!(extract_json(text), Some(json!({"passed": false})));
    }

    #[test]
    fn parses_unlabelled_fence() {
        let text = "```\n[1, 2]\n```";
        assert_eq!(extract_json(text), Some(json!([1, 2])));
    }

    #[test]
    fn falls_back_to_brace_span() {
        let text = "Verdict: {\"score\": 7, \"nested\": {\"x\": true}} end.";
        assert_eq!(
            extract_json(text),
            Some(json!({"score": 7, "nested": {"x": true}}))
        );
    }

    #[test]
    fn garbage_yields_none() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json(""), None);
        assert_eq!(extract_object("[1]"), None);
    }

    #[test]
    fn code_block_prefers_script_fences() {
        let text = "```json\n{}\n```\n```rhai\nresult = 1;\n```";
        assert_eq!(extract_code_block(text).as_deref(), Some("result = 1;"));
        assert_eq!(extract_code_block("none"), None);
    }

    #[test]
    fn lenient_field_readers() {
        let map = extract_object(r#"{"passed": "False", "score": "8", "critique": null, "n": 3}"#)
            .unwrap();
        assert_eq!(bool_field(&map, &["passed"]), Some(false));
        assert_eq!(number_field(&map, &["score"]), Some(8.0));
        assert_eq!(string_field(&map, &["critique", "n"]).as_deref(), Some("3"));
    }
}
