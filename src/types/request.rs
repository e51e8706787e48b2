//! Canonical request shape accepted by every driver and remote server.

use crate::error::{Error, ErrorContext};
use crate::types::message::Message;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Service identifiers that do not take a conversation.
pub const NON_LLM_SERVICES: &[&str] = &["github", "slack", "jira"];

/// Metadata key that declares the kind of service a request targets.
pub const SERVICE_TYPE_KEY: &str = "service_type";

/// Whether a backend consumes a conversation (LLM) or a structured action (non-LLM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceKind {
    #[default]
    Llm,
    NonLlm,
}

impl ServiceKind {
    /// Classify a request from its model identifier and routing metadata.
    ///
    /// This is the only place the known non-LLM service table is consulted.
    pub fn detect(model: &str, metadata: &HashMap<String, Value>) -> Self {
        let model = model.to_lowercase();
        let declared = metadata.get(SERVICE_TYPE_KEY).and_then(Value::as_str) == Some("non_llm");
        let api_type = metadata
            .get("api_type")
            .and_then(Value::as_str)
            .map(|t| NON_LLM_SERVICES.contains(&t))
            .unwrap_or(false);
        if NON_LLM_SERVICES.contains(&model.as_str()) || declared || api_type {
            ServiceKind::NonLlm
        } else {
            ServiceKind::Llm
        }
    }

    pub fn is_non_llm(&self) -> bool {
        matches!(self, ServiceKind::NonLlm)
    }
}

/// Model Context Protocol request for completions and non-LLM services.
///
/// Construction enforces that `messages` is non-empty unless the request targets a
/// non-LLM service, so every `Request` value in the program is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RequestData")]
pub struct Request {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<String>,
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    parameters: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
}

/// Unvalidated request fields; the wire form before the invariant check.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestData {
    #[serde(default)]
    pub provider: Option<String>,
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl TryFrom<RequestData> for Request {
    type Error = Error;

    fn try_from(data: RequestData) -> Result<Self> {
        let kind = ServiceKind::detect(&data.model, &data.metadata);
        if data.messages.is_empty() && !kind.is_non_llm() {
            return Err(Error::invalid_request_with_context(
                "Messages cannot be empty for LLM services",
                ErrorContext::new()
                    .with_field_path("messages")
                    .with_details(format!("model: {}", data.model))
                    .with_source("request_validator"),
            ));
        }
        Ok(Request {
            provider: data.provider,
            model: data.model,
            messages: data.messages,
            temperature: data.temperature,
            max_tokens: data.max_tokens,
            stream: data.stream,
            parameters: data.parameters,
            metadata: data.metadata,
        })
    }
}

impl Request {
    /// Start building a request for `model`.
    pub fn builder(model: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(model)
    }

    /// Shorthand for a plain conversation request.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Result<Self> {
        Self::builder(model).messages(messages).build()
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    /// String-valued metadata entry, e.g. `action` or `session_id`.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// String-valued parameter entry.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn service_kind(&self) -> ServiceKind {
        ServiceKind::detect(&self.model, &self.metadata)
    }

    /// Replace the conversation, re-checking the non-empty invariant.
    pub fn with_messages(self, messages: Vec<Message>) -> Result<Self> {
        Request::try_from(RequestData {
            messages,
            ..self.into_data()
        })
    }

    /// Same request with `provider` set.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Callers must only pass a non-empty list (or target a non-LLM service).
    pub(crate) fn set_messages(&mut self, messages: Vec<Message>) {
        debug_assert!(!messages.is_empty() || self.service_kind().is_non_llm());
        self.messages = messages;
    }

    pub fn into_data(self) -> RequestData {
        RequestData {
            provider: self.provider,
            model: self.model,
            messages: self.messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: self.stream,
            parameters: self.parameters,
            metadata: self.metadata,
        }
    }

    /// Serialize to a JSON object, omitting unset optional fields.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse and validate a JSON object produced by [`Request::to_value`] or a caller.
    pub fn from_value(value: Value) -> Result<Self> {
        let data: RequestData = serde_json::from_value(value).map_err(|e| {
            Error::invalid_request_with_context(
                "Request does not match the canonical shape",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("request_validator"),
            )
        })?;
        Request::try_from(data)
    }

    /// Re-validate through a serialization round trip.
    pub fn is_valid(&self) -> bool {
        self.to_value()
            .and_then(Request::from_value)
            .map(|r| &r == self)
            .unwrap_or(false)
    }
}

/// Builder for [`Request`]; validation happens in [`RequestBuilder::build`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    data: RequestData,
}

impl RequestBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            data: RequestData {
                model: model.into(),
                ..Default::default()
            },
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.data.provider = Some(provider.into());
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.data.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.data.messages = messages;
        self
    }

    pub fn temperature(mut self, t: f64) -> Self {
        self.data.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.data.max_tokens = Some(n);
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.data.stream = stream;
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.parameters.insert(key.into(), value.into());
        self
    }

    pub fn parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.data.parameters.extend(parameters);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.metadata.insert(key.into(), value.into());
        self
    }

    /// Declare the target service kind explicitly (recorded as `metadata.service_type`).
    pub fn service_kind(mut self, kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::NonLlm => {
                self.data
                    .metadata
                    .insert(SERVICE_TYPE_KEY.to_string(), Value::from("non_llm"));
            }
            ServiceKind::Llm => {
                self.data.metadata.remove(SERVICE_TYPE_KEY);
            }
        }
        self
    }

    pub fn build(self) -> Result<Request> {
        Request::try_from(self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_llm_request_requires_messages() {
        let err = Request::new("gpt-4", vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
        assert!(Request::new("gpt-4", vec![Message::user("hi")]).is_ok());
    }

    #[test]
    fn test_non_llm_request_may_be_empty() {
        for model in ["github", "slack", "jira", "GitHub"] {
            assert!(Request::new(model, vec![]).is_ok(), "{model}");
        }
        let by_metadata = Request::builder("custom-service")
            .metadata("service_type", "non_llm")
            .build()
            .unwrap();
        assert_eq!(by_metadata.service_kind(), ServiceKind::NonLlm);

        let by_api_type = Request::builder("tracker")
            .metadata("api_type", "jira")
            .build();
        assert!(by_api_type.is_ok());
    }

    #[test]
    fn test_explicit_service_kind_is_recorded_in_metadata() {
        let req = Request::builder("weather")
            .service_kind(ServiceKind::NonLlm)
            .build()
            .unwrap();
        assert_eq!(req.metadata_str("service_type"), Some("non_llm"));
    }

    #[test]
    fn test_round_trip_omits_unset_optionals() {
        let req = Request::builder("gpt-4")
            .message(Message::system("be brief"))
            .message(Message::user("hi"))
            .parameter("top_p", 0.9)
            .metadata("session_id", "s1")
            .build()
            .unwrap();
        let v = req.to_value().unwrap();
        assert!(v.get("provider").is_none());
        assert!(v.get("temperature").is_none());
        assert_eq!(v["stream"], json!(false));
        assert_eq!(Request::from_value(v).unwrap(), req);

        let full = Request::builder("claude-3")
            .provider("anthropic")
            .message(Message::user("x"))
            .temperature(0.2)
            .max_tokens(64)
            .stream(true)
            .build()
            .unwrap();
        assert_eq!(Request::from_value(full.to_value().unwrap()).unwrap(), full);
        assert!(full.is_valid());
    }

    #[test]
    fn test_deserialize_enforces_invariant() {
        let r: std::result::Result<Request, _> =
            serde_json::from_value(json!({"model": "gpt-4", "messages": []}));
        assert!(r.is_err());
    }

    #[test]
    fn test_from_value_schema_errors_are_invalid_request() {
        let bad_role = json!({"model": "m", "messages": [{"role": "tool", "content": "x"}]});
        let err = Request::from_value(bad_role).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
        assert!(err.context().and_then(|c| c.details.as_deref()).unwrap().contains("tool"));

        let bad_model = json!({"model": 5, "messages": [{"role": "user", "content": "x"}]});
        assert!(matches!(
            Request::from_value(bad_model),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_with_messages_revalidates() {
        let req = Request::new("gpt-4", vec![Message::user("a")]).unwrap();
        assert!(req.clone().with_messages(vec![]).is_err());
        let next = req.with_messages(vec![Message::user("b")]).unwrap();
        assert_eq!(next.messages()[0].content(), "b");
    }
}
