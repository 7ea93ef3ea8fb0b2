use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};

lazy_static! {
    static ref OBJECT_SPAN: Regex = Regex::new(r"(?s)\{.*\}").expect("Valid regex pattern");
    static ref ARRAY_SPAN: Regex = Regex::new(r"(?s)\[.*\]").expect("Valid regex pattern");
}

/// Pulls a JSON object out of free-form model output
pub fn extract_json(text: &str) -> Result<Value> {
    if let Some(span) = OBJECT_SPAN.find(text) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(span.as_str()) {
            return Ok(value);
        }
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text.trim()) {
        return Ok(value);
    }

    // A bare array gets wrapped
    if let Some(span) = ARRAY_SPAN.find(text) {
        if let Ok(items @ Value::Array(_)) = serde_json::from_str::<Value>(span.as_str()) {
            return Ok(json!({ "items": items }));
        }
    }

    Err(anyhow!("No valid JSON found in response"))
}

/// Checks required keys and top-level property types
pub fn validate_schema(data: &Value, schema: &Value) -> Result<()> {
    let object = data
        .as_object()
        .ok_or_else(|| anyhow!("Expected a JSON object"))?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(anyhow!("Required field '{}' missing from response", key));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (key, spec) in properties {
            let (Some(value), Some(expected)) = (object.get(key), spec.get("type").and_then(Value::as_str)) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(anyhow!("Field '{}' should be {}", key, expected));
            }
        }
    }

    Ok(())
}

/// Present and non-empty, the way the stages test for "has output"
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|n| n != 0.0).unwrap_or(true),
    }
}

/// String field lookup with a fallback
pub fn text<'a>(value: Option<&'a Value>, key: &str, default: &'a str) -> &'a str {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_str)
        .unwrap_or(default)
}

/// Compact JSON list for prompt lines
pub fn list<S: AsRef<str>>(items: &[S]) -> String {
    let items: Vec<&str> = items.iter().map(|s| s.as_ref()).collect();
    serde_json::to_string(&items).unwrap_or_else(|_| "[]".to_string())
}

/// Renders a nested value for a prompt, `[]` when missing
pub fn inline(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) if !v.is_null() => v.to_string(),
        _ => "[]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_object_from_chatter() {
        let text = "Sure! Here it is:\n```json\n{\n  \"a\": 1,\n  \"b\": {\"c\": [1, 2]}\n}\n```\nAnything else?";
        assert_eq!(extract_json(text).unwrap(), json!({ "a": 1, "b": { "c": [1, 2] } }));
    }

    #[test]
    fn test_wraps_bare_array() {
        let value = extract_json("The list: [\"one\", \"two\"] done").unwrap();
        assert_eq!(value, json!({ "items": ["one", "two"] }));
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(extract_json("I cannot help with that.").is_err());
        assert!(extract_json("{ broken: yes }").is_err());
    }

    #[test]
    fn test_schema_required_and_types() {
        let schema = json!({
            "type": "object",
            "required": ["title", "sections"],
            "properties": {
                "title": { "type": "string" },
                "sections": { "type": "array" },
                "meta": { "type": "object" }
            }
        });

        assert!(validate_schema(&json!({ "title": "T", "sections": [] }), &schema).is_ok());

        let err = validate_schema(&json!({ "title": "T" }), &schema).unwrap_err();
        assert_eq!(err.to_string(), "Required field 'sections' missing from response");

        let err = validate_schema(&json!({ "title": 3, "sections": [] }), &schema).unwrap_err();
        assert_eq!(err.to_string(), "Field 'title' should be string");

        assert!(validate_schema(&json!(["no"]), &schema).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&json!({}))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!({ "a": 1 }))));
        assert!(truthy(Some(&json!([0]))));
    }

    #[test]
    fn test_prompt_helpers() {
        let persona = json!({ "name": "Owner", "goals": ["grow"] });
        assert_eq!(text(Some(&persona), "name", "Target Customer"), "Owner");
        assert_eq!(text(None, "name", "Target Customer"), "Target Customer");
        assert_eq!(list(&["a", "b"]), "[\"a\",\"b\"]");
        assert_eq!(inline(persona.get("goals")), "[\"grow\"]");
        assert_eq!(inline(persona.get("pain_points")), "[]");
    }
}
