//! Parsing of LLM replies.
//!
//! The reply is expected to be a JSON array of strings, but models wander:
//! object-wrapped arrays, code fences, bare lines. Parsing tries each shape
//! in turn and only gives up to a line split at the very end.

use serde_json::Value;
use tracing::warn;

/// Parse a reply into a list of translations.
pub fn parse_reply(content: &str) -> Vec<String> {
    let trimmed = content.trim();

    if let Some(list) = try_parse_json(trimmed) {
        return list;
    }

    // Strip markdown code fences and retry
    let unfenced = strip_code_fences(trimmed);
    if let Some(list) = try_parse_json(unfenced) {
        return list;
    }

    // Look for the first bracketed array anywhere in the text
    if let Some(array_text) = extract_bracketed_array(trimmed) {
        if let Some(list) = try_parse_json(&array_text) {
            return list;
        }
    }

    warn!("reply is not JSON in any recognized shape, splitting lines");
    trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}

/// Accept a JSON array, or an object wrapping one under "translations",
/// "texts", or its first array-valued field.
fn try_parse_json(content: &str) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(content).ok()?;
    let array = match value {
        Value::Array(items) => items,
        Value::Object(map) => {
            let preferred = map
                .get("translations")
                .or_else(|| map.get("texts"))
                .and_then(Value::as_array)
                .cloned();
            match preferred {
                Some(items) => items,
                None => map
                    .values()
                    .find_map(Value::as_array)
                    .cloned()?,
            }
        }
        _ => return None,
    };
    Some(array.into_iter().map(value_to_string).collect())
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Drop a leading/trailing ``` fence line pair.
fn strip_code_fences(content: &str) -> &str {
    let content = content.trim();
    if !content.starts_with("```") {
        return content;
    }
    let without_open = match content.find('\n') {
        Some(idx) => &content[idx + 1..],
        None => return content,
    };
    without_open
        .trim_end()
        .trim_end_matches("```")
        .trim()
}

/// First `[` ... last `]` span, if both are present.
fn extract_bracketed_array(content: &str) -> Option<String> {
    let start = content.find('[')?;
    let end = content.rfind(']')?;
    (end > start).then(|| content[start..=end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_array() {
        assert_eq!(parse_reply(r#"["a", "b"]"#), vec!["a", "b"]);
    }

    #[test]
    fn test_object_with_translations_key() {
        assert_eq!(
            parse_reply(r#"{"translations": ["a", "b"]}"#),
            vec!["a", "b"]
        );
        assert_eq!(parse_reply(r#"{"texts": ["x"]}"#), vec!["x"]);
    }

    #[test]
    fn test_object_with_first_array_field() {
        assert_eq!(
            parse_reply(r#"{"result": ["one", "two"], "note": "hi"}"#),
            vec!["one", "two"]
        );
    }

    #[test]
    fn test_code_fenced_array() {
        let reply = "```json\n[\"a\", \"b\"]\n```";
        assert_eq!(parse_reply(reply), vec!["a", "b"]);
    }

    #[test]
    fn test_array_embedded_in_prose() {
        let reply = "Here are your translations: [\"a\", \"b\"] enjoy!";
        assert_eq!(parse_reply(reply), vec!["a", "b"]);
    }

    #[test]
    fn test_line_split_fallback() {
        let reply = "first line\n\nsecond line\n";
        assert_eq!(parse_reply(reply), vec!["first line", "second line"]);
    }

    #[test]
    fn test_non_string_items_stringified() {
        assert_eq!(parse_reply("[1, \"two\"]"), vec!["1", "two"]);
    }
}
