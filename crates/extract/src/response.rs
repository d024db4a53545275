use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)```(?:json)?").unwrap());
static OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[\s\S]*\}").unwrap());

/// Pulls the outermost JSON object out of a model reply, tolerating code fences and chatter.
pub fn json_object(raw: &str) -> Result<serde_json::Map<String, Value>, String> {
    let cleaned = FENCE.replace_all(raw, "");
    let candidate = OBJECT
        .find(&cleaned)
        .ok_or_else(|| "no JSON object found in response".to_string())?;

    match serde_json::from_str::<Value>(candidate.as_str()) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("response JSON is not an object".to_string()),
        Err(e) => Err(format!("invalid JSON: {e}")),
    }
}

/// String view of a JSON value; null, empty and "null"-like strings count as absent.
pub fn non_empty_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let lowered = text.to_ascii_lowercase();
    if text.is_empty() || matches!(lowered.as_str(), "null" | "none" | "n/a" | "not found") {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_object_strips_fences() {
        let map = json_object("Sure!\n```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(map.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_json_object_errors() {
        assert!(json_object("no braces here").is_err());
        assert!(json_object("{not json}").unwrap_err().starts_with("invalid JSON"));
    }

    #[test]
    fn test_non_empty_string() {
        assert_eq!(non_empty_string(&json!("  2% ")), Some("2%".to_string()));
        assert_eq!(non_empty_string(&json!(12.5)), Some("12.5".to_string()));
        assert_eq!(non_empty_string(&json!("N/A")), None);
        assert_eq!(non_empty_string(&json!(null)), None);
    }
}
