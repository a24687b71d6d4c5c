//! Markdown for workflow outputs.
//!
//! Workflow apps return their answer as a loosely structured value: plain
//! text, JSON serialized into a string (sometimes several times over, or
//! wrapped in a `mes_result` object or a ```json fence), key/value arrays,
//! or arbitrary objects. [`format_outputs`] turns whatever arrives into
//! Markdown the renderer can show as text, bullets or a table.

use serde_json::{Map, Value};
use tracing::debug;

/// Output keys tried in order before falling back to the first key.
const ANSWER_KEYS: &[&str] = &["text", "result", "output", "mes_result", "answer"];

/// Number of times a JSON-in-a-string answer is unwrapped.
const MAX_UNWRAP: usize = 3;

/// Comma lists longer than this are broken into bullets.
const LONG_LIST: usize = 3;
const ITEMS_PER_BULLET: usize = 5;

/// Objects with more keys than this become a table.
const TABLE_MIN_KEYS: usize = 3;

/// Pick the answer out of a `workflow_finished` `outputs` object and format it.
///
/// Returns `None` when the outputs carry nothing usable.
pub fn format_outputs(outputs: &Value) -> Option<String> {
    let raw = select_output(outputs)?;
    let text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(format_structured(&text))
}

/// The value an answer is read from: the first truthy well-known key,
/// otherwise the first key present.
pub fn select_output(outputs: &Value) -> Option<&Value> {
    let map = outputs.as_object()?;
    ANSWER_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find(|v| is_truthy(v))
        .or_else(|| map.values().next())
        .filter(|v| is_truthy(v))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Format a raw output string as Markdown.
pub fn format_structured(raw: &str) -> String {
    let mut text = raw.trim().to_string();

    for _ in 0..MAX_UNWRAP {
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) if map.contains_key("mes_result") => {
                text = display(&map["mes_result"]);
            }
            Ok(Value::String(inner)) => text = inner,
            Ok(value @ (Value::Object(_) | Value::Array(_))) => return format_value(&value),
            Ok(_) | Err(_) => break,
        }
    }

    let cleaned = clean_text(&text);

    let lines: Vec<&str> = cleaned.split('\n').collect();
    if lines.len() > 1 && lines.iter().any(|l| l.contains(':')) {
        debug!(lines = lines.len(), "formatting multi-line key/value output");
        return format_key_value_lines(&lines);
    }

    if !cleaned.starts_with('{') && !cleaned.starts_with('[') {
        return cleaned;
    }

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => format_value(&value),
        _ => cleaned,
    }
}

/// Drop code fences and wrapping quotes, and expand escaped newlines.
fn clean_text(text: &str) -> String {
    let mut s = text
        .replace("```json", "")
        .replace("```markdown", "")
        .replace("```", "")
        .trim()
        .to_string();
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted {
        s = s[1..s.len() - 1].to_string();
    }
    s.replace("\\n", "\n")
}

fn format_key_value_lines(lines: &[&str]) -> String {
    let mut out = Vec::new();
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            if !line.trim().is_empty() {
                out.push(line.to_string());
            }
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let items: Vec<&str> = value.split(',').map(str::trim).filter(|i| !i.is_empty()).collect();
        if value.contains(',') && items.len() > LONG_LIST {
            out.push(format!("**{key}** ({} items):", items.len()));
            for group in items.chunks(ITEMS_PER_BULLET) {
                out.push(format!("- {}", group.join(", ")));
            }
        } else {
            out.push(format!("**{key}**: {value}"));
        }
    }
    out.join("\n")
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Array(items) => format_array(items),
        Value::Object(map) => format_object(map),
        other => display(other),
    }
}

fn table(header: &[String], rows: &[Vec<String>]) -> String {
    let mut out = format!("| {} |\n", header.join(" | "));
    out.push('|');
    out.push_str(&"------|".repeat(header.len()));
    for row in rows {
        out.push_str(&format!("\n| {} |", row.join(" | ")));
    }
    out
}

fn format_array(items: &[Value]) -> String {
    let Some(Value::Object(first)) = items.first() else {
        return items
            .iter()
            .map(|item| format!("- {}", display(item)))
            .collect::<Vec<_>>()
            .join("\n");
    };

    if first.contains_key("key") && first.contains_key("value") {
        let rows: Vec<Vec<String>> = items
            .iter()
            .map(|item| vec![display(&item["key"]), display(&item["value"])])
            .collect();
        return table(&["Item".to_string(), "Value".to_string()], &rows);
    }

    let keys: Vec<String> = first.keys().cloned().collect();
    let rows: Vec<Vec<String>> = items
        .iter()
        .map(|item| {
            keys.iter()
                .map(|k| item.get(k).map(display).unwrap_or_default())
                .collect()
        })
        .collect();
    table(&keys, &rows)
}

fn format_object(map: &Map<String, Value>) -> String {
    if let Some(Value::Array(output)) = map.get("output") {
        return output.iter().map(display).collect::<Vec<_>>().join("\n");
    }
    if map.len() > TABLE_MIN_KEYS {
        let rows: Vec<Vec<String>> = map.iter().map(|(k, v)| vec![k.clone(), display(v)]).collect();
        return table(&["Item".to_string(), "Value".to_string()], &rows);
    }
    map.iter()
        .map(|(k, v)| format!("**{k}**: {}", display(v)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_prefers_text_key() {
        let outputs = json!({"answer": "late", "text": "first"});
        assert_eq!(select_output(&outputs), Some(&json!("first")));
    }

    #[test]
    fn test_select_skips_empty_known_keys() {
        let outputs = json!({"text": "", "result": "r"});
        assert_eq!(select_output(&outputs), Some(&json!("r")));
    }

    #[test]
    fn test_select_falls_back_to_first_key() {
        let outputs = json!({"zeta": "z", "alpha": "a"});
        assert_eq!(select_output(&outputs), Some(&json!("z")));
    }

    #[test]
    fn test_select_empty_outputs() {
        assert!(select_output(&json!({})).is_none());
        assert!(select_output(&json!("not an object")).is_none());
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(format_structured("Shift output is fine"), "Shift output is fine");
    }

    #[test]
    fn test_mes_result_unwrapped() {
        let raw = r#"{"mes_result":"Transferred: 42"}"#;
        assert_eq!(format_structured(raw), "Transferred: 42");
    }

    #[test]
    fn test_double_encoded_string_unwrapped() {
        let raw = serde_json::to_string(&json!("plain answer")).unwrap();
        assert_eq!(format_structured(&raw), "plain answer");
    }

    #[test]
    fn test_fenced_json_array_of_key_values_becomes_table() {
        let raw = "```json\n[{\"key\":\"Good\",\"value\":40},{\"key\":\"Scrap\",\"value\":2}]\n```";
        assert_eq!(
            format_structured(raw),
            "| Item | Value |\n|------|------|\n| Good | 40 |\n| Scrap | 2 |"
        );
    }

    #[test]
    fn test_object_array_uses_first_object_keys() {
        let raw = r#"[{"line":"L1","qty":5},{"line":"L2"}]"#;
        assert_eq!(
            format_structured(raw),
            "| line | qty |\n|------|------|\n| L1 | 5 |\n| L2 |  |"
        );
    }

    #[test]
    fn test_plain_array_becomes_bullets() {
        assert_eq!(format_structured(r#"["a", 2]"#), "- a\n- 2");
    }

    #[test]
    fn test_output_array_becomes_lines() {
        assert_eq!(format_structured(r#"{"output":["x","y"]}"#), "x\ny");
    }

    #[test]
    fn test_small_object_becomes_bold_lines() {
        assert_eq!(format_structured(r#"{"a":1,"b":"two"}"#), "**a**: 1\n**b**: two");
    }

    #[test]
    fn test_large_object_becomes_table() {
        let out = format_structured(r#"{"a":1,"b":2,"c":3,"d":4}"#);
        assert!(out.starts_with("| Item | Value |"), "{out}");
        assert_eq!(out.lines().count(), 6);
    }

    #[test]
    fn test_key_value_lines_with_long_comma_list() {
        let raw = "Orders: A1, A2, A3, A4, A5, A6\nStatus: ok";
        assert_eq!(
            format_structured(raw),
            "**Orders** (6 items):\n- A1, A2, A3, A4, A5\n- A6\n**Status**: ok"
        );
    }

    #[test]
    fn test_key_value_lines_short_list_kept() {
        assert_eq!(format_structured("Lines: L1, L2\nnote"), "**Lines**: L1, L2\nnote");
    }

    #[test]
    fn test_escaped_newlines_expanded() {
        assert_eq!(format_structured(r#""Qty: 1\nRate: 2""#), "**Qty**: 1\n**Rate**: 2");
    }

    #[test]
    fn test_format_outputs_non_string_value() {
        let outputs = json!({"result": [{"key": "k", "value": "v"}]});
        assert_eq!(
            format_outputs(&outputs).as_deref(),
            Some("| Item | Value |\n|------|------|\n| k | v |")
        );
    }
}
