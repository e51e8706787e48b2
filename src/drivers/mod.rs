//! Provider 驱动抽象层：通过 trait 实现多厂商 API 适配的动态分发
//!
//! Provider driver abstraction. Every backend, LLM or not, is reached through
//! `Arc<dyn ProviderDriver>`, so the client, the MCP layer and the orchestrator
//! never know which vendor they are talking to.
//!
//! Drivers share one policy: in test or mock mode they answer deterministically
//! without touching the network, and in live mode they translate the canonical
//! [`Request`] into the vendor's wire format, filter parameters through an
//! allow-list, and normalize the reply back into a [`Response`] or a stream of
//! [`PartialResponse`]s whose last element is final.

pub mod anthropic;
pub mod cohere;
pub mod config;
pub mod factory;
pub mod gemini;
pub mod github;
pub mod local;
pub mod openai;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::error::Error;
use crate::types::{Message, MessageRole, PartialResponse, Request, Response, ServiceKind};
use crate::{BoxStream, Result};

pub use anthropic::AnthropicDriver;
pub use cohere::CohereDriver;
pub use config::DriverConfig;
pub use factory::{DriverConstructor, DriverFactory};
pub use gemini::GeminiDriver;
pub use github::GitHubDriver;
pub use local::LocalDriver;
pub use openai::OpenAiDriver;

/// Model identifier that mock-mode drivers reject, simulating an unknown model.
pub const MOCK_INVALID_MODEL: &str = "non-existent-model";

/// Fragments emitted by every mock-mode stream.
pub const MOCK_STREAM_FRAGMENTS: &[&str] =
    &["This ", "is ", "a ", "mock ", "streaming ", "response."];

/// Capability contract implemented once per backend.
///
/// The trait is object-safe; drivers are shared as `Arc<dyn ProviderDriver>`.
#[async_trait]
pub trait ProviderDriver: Send + Sync + std::fmt::Debug {
    /// Name the driver was registered under.
    fn provider_id(&self) -> &str;

    /// Whether the backend consumes a conversation.
    fn service_kind(&self) -> ServiceKind {
        ServiceKind::Llm
    }

    /// One completion.
    async fn send_request(&self, request: &Request) -> Result<Response>;

    /// Incremental completion. Exactly the last element has `is_final = true`.
    async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>>;
}

/// One decoded provider streaming event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamEvent {
    pub text: Option<String>,
    pub finish_reason: Option<String>,
    /// The provider signalled the end of the stream.
    pub done: bool,
}

impl StreamEvent {
    pub fn text(t: impl Into<String>) -> Self {
        Self {
            text: Some(t.into()),
            ..Default::default()
        }
    }

    pub fn finish(reason: Option<String>) -> Self {
        Self {
            finish_reason: reason,
            ..Default::default()
        }
    }

    pub fn skip() -> Self {
        Self::default()
    }
}

pub(crate) fn reject_invalid_model(request: &Request) -> Result<()> {
    if request.model() == MOCK_INVALID_MODEL {
        return Err(Error::InvalidModel(request.model().to_string()));
    }
    Ok(())
}

/// Deterministic mock-mode reply labelled with the provider family.
pub(crate) fn mock_response(label: &str, request: &Request) -> Result<Response> {
    reject_invalid_model(request)?;
    debug!(provider = label, model = request.model(), "mock response");
    let usage = HashMap::from([("total_tokens".to_string(), Value::from(10))]);
    Ok(Response::new(format!(
        "This is a mock response from {} for testing purposes.",
        label
    ))?
    .with_model(request.model())
    .with_usage(usage)
    .with_finish_reason("stop")
    .with_metadata("id", "mock-response-id"))
}

/// Deterministic mock-mode stream; concatenates to "This is a mock streaming response."
pub(crate) fn mock_stream(request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
    reject_invalid_model(request)?;
    let last = MOCK_STREAM_FRAGMENTS.len() - 1;
    let items: Vec<Result<PartialResponse>> = MOCK_STREAM_FRAGMENTS
        .iter()
        .enumerate()
        .map(|(i, t)| {
            Ok(if i == last {
                PartialResponse::final_chunk(*t).with_metadata("finish_reason", "stop")
            } else {
                PartialResponse::chunk(*t)
            })
        })
        .collect();
    Ok(Box::pin(stream::iter(items)))
}

/// Keep only allow-listed parameters, renaming `(canonical, native)` pairs.
pub(crate) fn allowed_parameters(
    provider: &str,
    params: &HashMap<String, Value>,
    allow: &[(&str, &str)],
) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in params {
        match allow.iter().find(|(canonical, _)| canonical == key) {
            Some((_, native)) => {
                out.insert((*native).to_string(), value.clone());
            }
            None => debug!(provider, parameter = %key, "dropping unsupported parameter"),
        }
    }
    out
}

/// Split system turns out of the conversation, joining them with blank lines.
pub(crate) fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let (system, rest): (Vec<&Message>, Vec<&Message>) = messages
        .iter()
        .partition(|m| m.role() == MessageRole::System);
    let system = if system.is_empty() {
        None
    } else {
        Some(
            system
                .iter()
                .map(|m| m.content())
                .collect::<Vec<_>>()
                .join("\n\n"),
        )
    };
    (system, rest)
}

/// Canonical usage mapping; sums input and output when no total is reported.
pub(crate) fn usage_map(
    input: Option<u64>,
    output: Option<u64>,
    total: Option<u64>,
) -> HashMap<String, Value> {
    let mut usage = HashMap::new();
    if let Some(i) = input {
        usage.insert("prompt_tokens".to_string(), Value::from(i));
    }
    if let Some(o) = output {
        usage.insert("completion_tokens".to_string(), Value::from(o));
    }
    let total = total.or(match (input, output) {
        (None, None) => None,
        (i, o) => Some(i.unwrap_or(0) + o.unwrap_or(0)),
    });
    if let Some(t) = total {
        usage.insert("total_tokens".to_string(), Value::from(t));
    }
    usage
}

pub(crate) fn missing_api_key(provider: &str) -> Error {
    Error::configuration_with_context(
        format!("{} API key is required outside test mode", provider),
        crate::error::ErrorContext::new()
            .with_field_path(format!("{}.api_key", provider))
            .with_source("driver"),
    )
}

/// Turn decoded provider events into canonical partials, closing with one final
/// element that carries the finish reason.
pub(crate) fn event_stream(
    values: BoxStream<'static, Value>,
    parse: fn(&Value) -> Result<StreamEvent>,
) -> BoxStream<'static, PartialResponse> {
    Box::pin(async_stream::try_stream! {
        let mut values = values;
        let mut finish_reason: Option<String> = None;
        while let Some(value) = values.next().await {
            let event = parse(&value?)?;
            if let Some(text) = event.text.filter(|t| !t.is_empty()) {
                yield PartialResponse::chunk(text);
            }
            if event.finish_reason.is_some() {
                finish_reason = event.finish_reason;
            }
            if event.done {
                break;
            }
        }
        let mut last = PartialResponse::final_chunk("");
        if let Some(reason) = finish_reason {
            last = last.with_metadata("finish_reason", reason);
        }
        yield last;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    #[test]
    fn test_allow_list_filters_and_renames() {
        let params: HashMap<String, Value> = [
            ("temperature".to_string(), json!(0.3)),
            ("max_tokens".to_string(), json!(10)),
            ("logit_bias".to_string(), json!({})),
        ]
        .into_iter()
        .collect();
        let out = allowed_parameters(
            "anthropic",
            &params,
            &[("temperature", "temperature"), ("max_tokens", "max_tokens_to_sample")],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out["max_tokens_to_sample"], json!(10));
        assert!(!out.contains_key("logit_bias"));
    }

    #[test]
    fn test_usage_sums_when_total_missing() {
        let u = usage_map(Some(3), Some(4), None);
        assert_eq!(u["total_tokens"], json!(7));
        let reported = usage_map(Some(3), Some(4), Some(9));
        assert_eq!(reported["total_tokens"], json!(9));
        assert!(usage_map(None, None, None).is_empty());
    }

    #[test]
    fn test_split_system_joins_turns() {
        let msgs = vec![
            Message::system("a"),
            Message::user("u"),
            Message::system("b"),
        ];
        let (system, rest) = split_system(&msgs);
        assert_eq!(system.as_deref(), Some("a\n\nb"));
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_stream_has_one_final_element() {
        let req = Request::new("m", vec![Message::user("x")]).unwrap();
        let parts: Vec<PartialResponse> = mock_stream(&req).unwrap().try_collect().await.unwrap();
        let text: String = parts.iter().map(|p| p.partial_text.as_str()).collect();
        assert_eq!(text, "This is a mock streaming response.");
        assert_eq!(parts.iter().filter(|p| p.is_final).count(), 1);
        assert!(parts.last().unwrap().is_final);
    }

    #[test]
    fn test_mock_response_rejects_sentinel_model() {
        let req = Request::new(MOCK_INVALID_MODEL, vec![Message::user("x")]).unwrap();
        assert!(matches!(mock_response("OpenAI", &req), Err(Error::InvalidModel(_))));
    }

    #[tokio::test]
    async fn test_event_stream_appends_final_marker() {
        fn parse(v: &Value) -> Result<StreamEvent> {
            Ok(StreamEvent {
                text: v["t"].as_str().map(str::to_string),
                finish_reason: v["f"].as_str().map(str::to_string),
                done: false,
            })
        }
        let values: Vec<Result<Value>> = vec![
            Ok(json!({"t": "He"})),
            Ok(json!({"t": ""})),
            Ok(json!({"t": "llo", "f": "stop"})),
        ];
        let parts: Vec<PartialResponse> = event_stream(Box::pin(stream::iter(values)), parse)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_final);
        assert_eq!(parts[2].finish_reason(), Some("stop"));
        assert!(!parts[1].is_final);
    }
}
