/// Path lookup and `{{ expr }}` string templating over JSON payloads
///
/// Both are total: a missing segment resolves to `None` and renders as an
/// empty string, never an error.

use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;

/// Look up a dotted path such as `data.items[0].name` (≡ `data.items.0.name`)
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let normalized = normalize_indexes(path);
    let mut current = value;

    for segment in normalized.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// `{{ expr }}` with at least one character between the braces
fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("Invalid placeholder pattern")
    })
}

/// Numeric `[n]` index inside a path
fn index() -> &'static Regex {
    static INDEX: OnceLock<Regex> = OnceLock::new();
    INDEX.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("Invalid index pattern"))
}

/// Rewrite numeric `[n]` indexes as `.n` segments
fn normalize_indexes(path: &str) -> Cow<'_, str> {
    index().replace_all(path, ".${1}")
}

/// Replace every `{{ expr }}` with the value found at `expr` in `data`
pub fn interpolate(template: &str, data: &Value) -> String {
    placeholder()
        .replace_all(template, |caps: &Captures| {
            stringify(resolve_path(data, caps[1].trim()))
        })
        .into_owned()
}

/// Render every string leaf of a JSON value as a template
pub fn interpolate_value(value: &Value, data: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate(s, data)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate_value(v, data)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate_value(v, data)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn stringify(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_bracket_and_dotted_indexes_alike() {
        let data = json!({ "data": { "items": [{ "name": "x" }, { "name": "y" }] } });

        assert_eq!(resolve_path(&data, "data.items[0].name"), Some(&json!("x")));
        assert_eq!(resolve_path(&data, "data.items.1.name"), Some(&json!("y")));
        assert_eq!(resolve_path(&data, "missing.path"), None);
        assert_eq!(resolve_path(&data, "data.items[9]"), None);
        assert_eq!(resolve_path(&data, ""), None);
    }

    #[test]
    fn numeric_segments_also_match_object_keys() {
        let data = json!({ "codes": { "0": "zero" } });
        assert_eq!(resolve_path(&data, "codes[0]"), Some(&json!("zero")));
    }

    #[test]
    fn interpolates_and_blanks_missing_values() {
        let data = json!({ "name": "Ada", "age": 36, "tags": ["a"], "none": null });

        assert_eq!(interpolate("Hello {{name}}", &data), "Hello Ada");
        assert_eq!(interpolate("Hello {{ name }}!", &data), "Hello Ada!");
        assert_eq!(interpolate("[{{missing}}]", &data), "[]");
        assert_eq!(interpolate("{{none}}|{{age}}", &data), "|36");
        assert_eq!(interpolate("{{tags}}", &data), "[\"a\"]");
        assert_eq!(interpolate("keep {{}} and {{ name", &data), "keep {{}} and {{ name");
        assert_eq!(interpolate("a{{ }}b", &data), "ab");
    }

    #[test]
    fn renders_string_leaves_of_structured_values() {
        let data = json!({ "user": { "id": 7 } });
        let body = json!({ "id": "{{user.id}}", "fixed": 1, "list": ["u-{{user.id}}"] });

        assert_eq!(
            interpolate_value(&body, &data),
            json!({ "id": "7", "fixed": 1, "list": ["u-7"] })
        );
    }
}
