//! Structural validation of raw request mappings.

use crate::error::{Error, ErrorContext};
use crate::types::MessageRole;
use crate::Result;
use serde_json::Value;

fn violation(message: &str, field: impl Into<String>) -> Error {
    Error::invalid_request_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("request_validator"),
    )
}

/// Check a raw request mapping before it becomes a [`crate::types::Request`].
///
/// Requires a string `model` and a non-empty `messages` list whose entries each
/// carry a known `role` and string `content`.
pub fn validate_request_value(data: &Value) -> Result<()> {
    let Some(obj) = data.as_object() else {
        return Err(violation("Request must be a mapping", "$"));
    };
    if !obj.contains_key("messages") {
        return Err(violation("Request must contain messages", "messages"));
    }
    if !obj.contains_key("model") {
        return Err(violation("Request must specify a model", "model"));
    }
    if !obj.get("model").map_or(false, Value::is_string) {
        return Err(violation("Model must be a string", "model"));
    }
    let messages = match obj.get("messages") {
        Some(Value::Array(list)) if !list.is_empty() => list,
        _ => return Err(violation("Messages must be a non-empty list", "messages")),
    };
    for (i, message) in messages.iter().enumerate() {
        let Some(m) = message.as_object() else {
            return Err(violation(
                "Each message must be a mapping",
                format!("messages[{}]", i),
            ));
        };
        if !m.contains_key("role") || !m.contains_key("content") {
            return Err(violation(
                "Each message must have role and content",
                format!("messages[{}]", i),
            ));
        }
        if m.get("role").and_then(Value::as_str).and_then(MessageRole::parse).is_none() {
            return Err(violation(
                "Message role must be one of system, user, assistant",
                format!("messages[{}].role", i),
            ));
        }
        if !m.get("content").map_or(false, Value::is_string) {
            return Err(violation(
                "Message content must be a string",
                format!("messages[{}].content", i),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: Error) -> Option<String> {
        err.context().and_then(|c| c.field_path.clone())
    }

    #[test]
    fn test_valid_request() {
        let v = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]});
        assert!(validate_request_value(&v).is_ok());
    }

    #[test]
    fn test_violations_name_the_field() {
        let cases = [
            (json!("text"), "$"),
            (json!({"model": "m"}), "messages"),
            (json!({"messages": [{"role": "user", "content": "x"}]}), "model"),
            (json!({"model": "m", "messages": []}), "messages"),
            (json!({"model": "m", "messages": "hi"}), "messages"),
            (json!({"model": "m", "messages": [{"role": "user", "content": "x"}, 3]}), "messages[1]"),
            (json!({"model": "m", "messages": [{"role": "user"}]}), "messages[0]"),
            (json!({"model": 5, "messages": [{"role": "user", "content": "x"}]}), "model"),
            (json!({"model": "m", "messages": [{"role": "tool", "content": "x"}]}), "messages[0].role"),
            (json!({"model": "m", "messages": [{"role": "user", "content": 1}]}), "messages[0].content"),
        ];
        for (value, field) in cases {
            let err = validate_request_value(&value).unwrap_err();
            assert_eq!(field_of(err).as_deref(), Some(field), "{value}");
        }
    }
}
