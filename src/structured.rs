//! Structured-output helpers for LLM JSON responses.
//!
//! Every pipeline stage asks the model for a small JSON object. Models are
//! told to emit only JSON but routinely wrap it in prose or code fences, so
//! all stages parse through [`extract_json`] before deserializing.

use serde::de::DeserializeOwned;

/// Error for structured-output parsing.
#[derive(Debug, Clone, thiserror::Error)]
#[error("structured output parse error: {0}")]
pub struct ParseError(pub String);

/// Extract a JSON object from a response (handles models that add surrounding text).
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    // If it starts with {, assume it's already JSON
    if trimmed.starts_with('{') {
        // Find matching closing brace
        let mut depth = 0;
        let mut end_idx = 0;
        for (i, c) in trimmed.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end_idx = i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if end_idx > 0 {
            return &trimmed[..end_idx];
        }
    }

    // Try to find JSON anywhere in the response
    if let Some(start) = trimmed.find('{') {
        let remainder = &trimmed[start..];
        let mut depth = 0;
        for (i, c) in remainder.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return &remainder[..=i];
                    }
                }
                _ => {}
            }
        }
    }

    trimmed
}

/// Deserialize a structured object out of a raw LLM response.
///
/// Malformed output is a hard error; no stage re-prompts the model.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let json = extract_json(raw);
    serde_json::from_str(json).map_err(|e| ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct IntentJson {
        intent: String,
    }

    #[test]
    fn extracts_bare_json() {
        assert_eq!(extract_json(r#"{"intent": "bar"}"#), r#"{"intent": "bar"}"#);
    }

    #[test]
    fn extracts_json_with_surrounding_prose() {
        let raw = "Sure, here is the classification:\n```json\n{\"intent\": \"sql\"}\n```\nDone.";
        let parsed: IntentJson = parse_structured(raw).unwrap();
        assert_eq!(parsed.intent, "sql");
    }

    #[test]
    fn extracts_nested_objects() {
        let raw = r#"prefix {"a": {"b": 1}} suffix"#;
        assert_eq!(extract_json(raw), r#"{"a": {"b": 1}}"#);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let result: Result<IntentJson, _> = parse_structured("not json at all");
        assert!(result.is_err());
    }
}
