use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::domain::{Labels, value_text};

static ARRAY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*?\]").expect("array pattern"));

// Objects nested up to three levels deep.
static OBJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:[^{}]|\{(?:[^{}]|\{[^{}]*\})*\})*\}").expect("object pattern")
});

static FENCED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*\n(.*?)\n```").expect("fenced pattern"));

/// Only the first bracketed span is tried.
pub fn extract_json_array(text: &str) -> Vec<Value> {
    let Some(found) = ARRAY_PATTERN.find(text) else {
        return Vec::new();
    };
    match serde_json::from_str::<Value>(found.as_str()) {
        Ok(Value::Array(values)) => values,
        _ => Vec::new(),
    }
}

pub fn extract_labels(text: &str) -> Option<Labels> {
    let values = extract_json_array(text);
    if values.is_empty() {
        return None;
    }
    let labels = values
        .into_iter()
        .map(value_text)
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect::<Vec<_>>();
    if labels.is_empty() {
        return None;
    }
    Some(Labels::new(labels))
}

pub fn extract_json_objects(text: &str) -> Vec<Value> {
    OBJECT_PATTERN
        .find_iter(text)
        .filter_map(|found| serde_json::from_str::<Value>(found.as_str()).ok())
        .collect()
}

pub fn extract_fenced_json(text: &str) -> Option<Vec<Value>> {
    let captures = FENCED_PATTERN.captures(text)?;
    let body = captures.get(1)?.as_str().trim();
    match serde_json::from_str::<Value>(body).ok()? {
        Value::Array(values) => Some(values),
        Value::Object(map) => Some(
            map.into_iter()
                .filter_map(|(_, value)| match value {
                    Value::Array(values) => Some(values),
                    _ => None,
                })
                .flatten()
                .collect(),
        ),
        _ => None,
    }
}

pub fn extract_entities_response(text: &str) -> Vec<Value> {
    if let Some(values) = extract_fenced_json(text) {
        return values;
    }
    extract_json_objects(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_spanning_lines() {
        let text = "Answer:\n[\n  \"male\"\n]\nDone";
        assert_eq!(extract_json_array(text), vec![Value::from("male")]);
    }

    #[test]
    fn first_array_wins_even_if_invalid() {
        assert!(extract_json_array("[not json] [\"ok\"]").is_empty());
    }

    #[test]
    fn empty_array_yields_no_labels() {
        assert_eq!(extract_labels("[]"), None);
    }

    #[test]
    fn array_between_prose() {
        assert_eq!(
            extract_json_array("prefix [1,2,3] suffix"),
            vec![Value::from(1), Value::from(2), Value::from(3)]
        );
        assert!(extract_json_array("no brackets here").is_empty());
    }

    #[test]
    fn numeric_labels_become_text() {
        assert_eq!(
            extract_labels("prefix [1,2,3] suffix"),
            Some(Labels::new(vec!["1".into(), "2".into(), "3".into()]))
        );
        assert_eq!(extract_labels("unknown"), None);
    }

    #[test]
    fn fenced_block_is_preferred() {
        let reply = "Here you go:\n```json\n[{\"Value\": \"10\", \"Units\": \"um\"}]\n```\n{\"Value\": \"1\"}";
        assert_eq!(
            extract_entities_response(reply),
            vec![serde_json::json!({"Value": "10", "Units": "um"})]
        );
    }

    #[test]
    fn fenced_object_flattens_list_fields() {
        let reply = "```json\n{\"entities\": [\"kidney\"], \"note\": \"x\", \"more\": [\"nephron\"]}\n```";
        assert_eq!(
            extract_fenced_json(reply),
            Some(vec![Value::from("kidney"), Value::from("nephron")])
        );
    }

    #[test]
    fn broken_fence_falls_back_to_inline_objects() {
        let reply = "```json\n{oops\n```\nBut: {\"Panel\": \"A\"} and {\"Panel\": \"B\"}";
        assert_eq!(extract_fenced_json(reply), None);
        assert_eq!(
            extract_entities_response(reply),
            vec![serde_json::json!({"Panel": "A"}), serde_json::json!({"Panel": "B"})]
        );
    }
}
