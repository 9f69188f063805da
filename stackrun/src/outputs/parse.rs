//! Tolerant decoding of engine JSON payloads.
//!
//! CI runners inject diagnostic lines (`::debug::`, `##[group]`, `[command]`)
//! into captured stdout, and wrappers print banners before and after the JSON
//! document. Decoding therefore locates the document inside the noise rather
//! than parsing the whole text.

use serde_json::Value;
use std::collections::BTreeMap;

/// Outputs published by a module, keyed by output name, with the engine's
/// `{"value": ..}` envelopes removed.
pub type OutputMap = BTreeMap<String, Value>;

const DIAGNOSTIC_PREFIXES: &[&str] = &["::", "##[", "[command]"];

/// Extracts the first JSON object or array found in `text`.
///
/// # Errors
///
/// Returns a description of the problem when no JSON document can be found.
pub fn parse_json_payload(text: &str) -> Result<Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("empty payload".to_string());
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    if let Some(value) = first_document(text) {
        return Ok(value);
    }

    let cleaned: String = text
        .lines()
        .filter(|line| {
            let l = line.trim_start();
            !DIAGNOSTIC_PREFIXES.iter().any(|p| l.starts_with(p))
        })
        .collect::<Vec<_>>()
        .join("\n");
    if let Some(value) = first_document(&cleaned) {
        return Ok(value);
    }

    Err(format!(
        "no JSON document found in {} bytes of output",
        text.len()
    ))
}

/// Tries every line that opens an object or array and returns the first one
/// that decodes. Trailing text after the document is ignored.
fn first_document(text: &str) -> Option<Value> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let start = offset + (line.len() - line.trim_start().len());
        offset += line.len();

        if !matches!(text[start..].chars().next(), Some('{' | '[')) {
            continue;
        }

        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            return Some(value);
        }
    }
    None
}

/// Decodes the payload of `output -json` into an [`OutputMap`].
///
/// # Errors
///
/// Returns a description of the problem when no JSON object can be found.
pub fn parse_output_map(text: &str) -> Result<OutputMap, String> {
    match parse_json_payload(text)? {
        Value::Object(entries) => Ok(entries
            .into_iter()
            .map(|(name, value)| (name, unwrap_envelope(value)))
            .collect()),
        other => Err(format!("expected a JSON object of outputs, found {}", type_name(&other))),
    }
}

/// Removes the `{"sensitive": .., "type": .., "value": ..}` envelope.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("value") && map.contains_key("type") => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Renders a scalar output as text. Strings are returned raw, null becomes
/// empty, anything else is rendered as JSON.
#[must_use]
pub fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Renders a list output as text elements, or `None` if the value is not a list.
#[must_use]
pub fn render_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().map(render_scalar).collect()),
        _ => None,
    }
}

/// Returns true when a value carries no information (null, "", [], {}).
#[must_use]
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CLEAN: &str = r#"{
  "vpc_id": {"sensitive": false, "type": "string", "value": "vpc-0abc"},
  "private_subnet_ids": {"sensitive": false, "type": ["list", "string"], "value": ["subnet-1", "subnet-2"]}
}"#;

    #[test]
    fn test_parse_clean_payload() {
        let outputs = parse_output_map(CLEAN).unwrap();
        assert_eq!(outputs.get("vpc_id"), Some(&json!("vpc-0abc")));
        assert_eq!(
            outputs.get("private_subnet_ids"),
            Some(&json!(["subnet-1", "subnet-2"]))
        );
    }

    #[test]
    fn test_parse_with_leading_and_trailing_noise() {
        let noisy = format!("[command]/usr/bin/terraform output -json\n{CLEAN}\n::debug::exitcode: 0\n");
        let outputs = parse_output_map(&noisy).unwrap();
        assert_eq!(outputs.len(), 2);
    }

    #[test]
    fn test_parse_with_interleaved_diagnostics() {
        let noisy = r#"{
::debug::Terraform exited with code 0.
  "kms_key_id": {"sensitive": false, "type": "string", "value": "key-1"}
##[endgroup]
}"#;
        let outputs = parse_output_map(noisy).unwrap();
        assert_eq!(outputs.get("kms_key_id"), Some(&json!("key-1")));
    }

    #[test]
    fn test_parse_plain_map_without_envelopes() {
        let outputs = parse_output_map(r#"{"a": "b"}"#).unwrap();
        assert_eq!(outputs.get("a"), Some(&json!("b")));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_output_map("").is_err());
        assert!(parse_output_map("Error: something bad").is_err());
        assert!(parse_output_map("{ not json").is_err());
        assert!(parse_output_map("[1, 2]").is_err());
    }

    #[test]
    fn test_render_scalar() {
        assert_eq!(render_scalar(&json!("x")), "x");
        assert_eq!(render_scalar(&json!(42)), "42");
        assert_eq!(render_scalar(&json!(true)), "true");
        assert_eq!(render_scalar(&Value::Null), "");
        assert_eq!(render_scalar(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_render_list() {
        assert_eq!(render_list(&json!(["a", 1])), Some(vec!["a".to_string(), "1".to_string()]));
        assert_eq!(render_list(&json!("a")), None);
    }

    #[test]
    fn test_is_empty_value() {
        assert!(is_empty_value(&json!("")));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&Value::Null));
        assert!(!is_empty_value(&json!(0)));
        assert!(!is_empty_value(&json!("vpc-1")));
    }
}
