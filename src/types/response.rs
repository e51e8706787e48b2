//! Canonical completion results: full responses and streaming fragments.

use crate::error::Error;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A complete reply from a driver or remote server.
///
/// `text` is never empty; structured output from non-LLM backends travels in
/// `plugin_data` next to a human-readable summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseData")]
pub struct Response {
    text: String,
    usage: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_reason: Option<String>,
    is_chunk: bool,
    metadata: HashMap<String, Value>,
    plugin_data: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(default)]
    text: String,
    #[serde(default)]
    usage: HashMap<String, Value>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    is_chunk: bool,
    #[serde(default)]
    metadata: HashMap<String, Value>,
    #[serde(default)]
    plugin_data: HashMap<String, Value>,
}

impl TryFrom<ResponseData> for Response {
    type Error = Error;

    fn try_from(d: ResponseData) -> Result<Self> {
        let mut resp = Response::new(d.text)?;
        resp.usage = d.usage;
        resp.model = d.model;
        resp.finish_reason = d.finish_reason;
        resp.is_chunk = d.is_chunk;
        resp.metadata = d.metadata;
        resp.plugin_data = d.plugin_data;
        Ok(resp)
    }
}

impl Response {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(Error::InvalidResponse("Response text cannot be empty".into()));
        }
        Ok(Self {
            text,
            usage: HashMap::new(),
            model: None,
            finish_reason: None,
            is_chunk: false,
            metadata: HashMap::new(),
            plugin_data: HashMap::new(),
        })
    }

    pub fn with_usage(mut self, usage: HashMap<String, Value>) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_plugin_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.plugin_data.insert(key.into(), value.into());
        self
    }

    pub fn as_chunk(mut self) -> Self {
        self.is_chunk = true;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn usage(&self) -> &HashMap<String, Value> {
        &self.usage
    }

    /// `usage.total_tokens` when the backend reported it.
    pub fn total_tokens(&self) -> Option<u64> {
        self.usage.get("total_tokens").and_then(Value::as_u64)
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    pub fn is_chunk(&self) -> bool {
        self.is_chunk
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn plugin_data(&self) -> &HashMap<String, Value> {
        &self.plugin_data
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let data: ResponseData = serde_json::from_value(value)?;
        Response::try_from(data)
    }
}

/// One fragment of a streamed reply. Exactly the last fragment of a stream is final.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialResponse {
    #[serde(default)]
    pub partial_text: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub plugin_data: HashMap<String, Value>,
}

impl PartialResponse {
    /// Intermediate fragment.
    pub fn chunk(text: impl Into<String>) -> Self {
        Self {
            partial_text: text.into(),
            ..Default::default()
        }
    }

    /// Terminating fragment.
    pub fn final_chunk(text: impl Into<String>) -> Self {
        Self {
            partial_text: text.into(),
            is_final: true,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_plugin_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.plugin_data.insert(key.into(), value.into());
        self
    }

    /// Finish reason carried on the final fragment, if any.
    pub fn finish_reason(&self) -> Option<&str> {
        self.metadata.get("finish_reason").and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_text_is_rejected() {
        assert!(matches!(Response::new(""), Err(Error::InvalidResponse(_))));
        assert!(Response::from_value(json!({"text": ""})).is_err());
        assert!(Response::from_value(json!({"usage": {}})).is_err());
    }

    #[test]
    fn test_response_from_remote_body() {
        let resp = Response::from_value(json!({
            "text": "hello",
            "usage": {"total_tokens": 7},
            "finish_reason": "stop",
        }))
        .unwrap();
        assert_eq!(resp.text(), "hello");
        assert_eq!(resp.total_tokens(), Some(7));
        assert_eq!(resp.finish_reason(), Some("stop"));
        assert!(resp.model().is_none());
        assert!(!resp.is_chunk());
        assert!(resp.plugin_data().is_empty());
    }

    #[test]
    fn test_response_value_omits_unset_optionals() {
        let v = Response::new("x").unwrap().to_value().unwrap();
        assert!(v.get("model").is_none());
        assert!(v.get("finish_reason").is_none());
        assert_eq!(v["plugin_data"], json!({}));
    }

    #[test]
    fn test_partial_defaults() {
        let p = PartialResponse::from_value(json!({"partial_text": "ab"})).unwrap();
        assert!(!p.is_final);
        let last = PartialResponse::final_chunk("").with_metadata("finish_reason", "stop");
        assert!(last.is_final);
        assert_eq!(last.finish_reason(), Some("stop"));
    }
}
