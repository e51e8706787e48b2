//! Cohere driver: `generate` for completions, `chat` NDJSON for streaming.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{
    allowed_parameters, event_stream, missing_api_key, mock_response, mock_stream, split_system,
    usage_map, DriverConfig, ProviderDriver, StreamEvent,
};
use crate::error::Error;
use crate::transport::decode::ndjson_values;
use crate::transport::{HttpTransport, DEFAULT_TIMEOUT_SECS};
use crate::types::{MessageRole, PartialResponse, Request, Response};
use crate::{BoxStream, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.cohere.ai/v1";

const ALLOWED: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("max_tokens", "max_tokens"),
    ("p", "p"),
    ("frequency_penalty", "frequency_penalty"),
    ("presence_penalty", "presence_penalty"),
];

#[derive(Debug)]
pub struct CohereDriver {
    provider_id: String,
    config: DriverConfig,
    transport: Option<HttpTransport>,
}

impl CohereDriver {
    pub fn new(provider_id: impl Into<String>, config: DriverConfig) -> Result<Self> {
        let transport = match (&config.api_key, config.is_mock()) {
            (Some(key), false) if !key.is_empty() => Some(
                HttpTransport::new(
                    config.base_url_or(DEFAULT_BASE_URL),
                    Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                )?
                .with_bearer(key.expose()),
            ),
            _ => None,
        };
        Ok(Self {
            provider_id: provider_id.into(),
            config,
            transport,
        })
    }

    /// Flatten the conversation into a role-prefixed prompt; `generate` has no system slot.
    pub fn build_prompt(request: &Request) -> String {
        request
            .messages()
            .iter()
            .map(|m| {
                let label = match m.role() {
                    MessageRole::System => "System",
                    MessageRole::User => "User",
                    MessageRole::Assistant => "Assistant",
                };
                format!("{}: {}\n", label, m.content())
            })
            .collect()
    }

    fn apply_sampling(request: &Request, body: &mut Value) {
        if let Some(t) = request.temperature() {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens() {
            body["max_tokens"] = json!(n);
        }
        for (k, v) in allowed_parameters("cohere", request.parameters(), ALLOWED) {
            body[k.as_str()] = v;
        }
    }

    pub fn build_generate_body(request: &Request) -> Value {
        let mut body = json!({
            "model": request.model(),
            "prompt": Self::build_prompt(request),
        });
        Self::apply_sampling(request, &mut body);
        body
    }

    /// Chat body: last turn is the message, earlier turns the history, system the preamble.
    pub fn build_chat_body(request: &Request) -> Value {
        let (system, turns) = split_system(request.messages());
        let (message, history) = match turns.split_last() {
            Some((last, earlier)) => (last.content().to_string(), earlier.to_vec()),
            None => (String::new(), Vec::new()),
        };
        let chat_history: Vec<Value> = history
            .iter()
            .map(|m| {
                let role = match m.role() {
                    MessageRole::Assistant => "CHATBOT",
                    _ => "USER",
                };
                json!({"role": role, "message": m.content()})
            })
            .collect();

        let mut body = json!({
            "model": request.model(),
            "message": message,
            "stream": true,
        });
        if !chat_history.is_empty() {
            body["chat_history"] = Value::Array(chat_history);
        }
        if let Some(sys) = system {
            body["preamble"] = Value::String(sys);
        }
        Self::apply_sampling(request, &mut body);
        body
    }

    pub fn finish_reason(reason: &str) -> String {
        match reason {
            "COMPLETE" => "stop".to_string(),
            "MAX_TOKENS" => "length".to_string(),
            other => other.to_lowercase(),
        }
    }

    pub fn parse_response(body: &Value, request: &Request) -> Result<Response> {
        let text = body
            .pointer("/generations/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidResponse("Cohere reply has no generation".into()))?;
        let usage = body
            .pointer("/meta/billed_units")
            .map(|u| usage_map(u["input_tokens"].as_u64(), u["output_tokens"].as_u64(), None))
            .unwrap_or_default();

        let mut resp = Response::new(text)?
            .with_usage(usage)
            .with_model(request.model());
        if let Some(reason) = body
            .pointer("/generations/0/finish_reason")
            .and_then(Value::as_str)
        {
            resp = resp.with_finish_reason(Self::finish_reason(reason));
        }
        if let Some(id) = body.get("id").and_then(Value::as_str) {
            resp = resp.with_metadata("id", id);
        }
        Ok(resp)
    }

    pub fn parse_stream_event(v: &Value) -> Result<StreamEvent> {
        match v["event_type"].as_str().unwrap_or("") {
            "text-generation" => Ok(v["text"]
                .as_str()
                .map(StreamEvent::text)
                .unwrap_or_else(StreamEvent::skip)),
            "stream-end" => Ok(StreamEvent {
                finish_reason: v["finish_reason"].as_str().map(Self::finish_reason),
                done: true,
                ..Default::default()
            }),
            _ => Ok(StreamEvent::skip()),
        }
    }

    fn live(&self) -> Result<&HttpTransport> {
        self.transport
            .as_ref()
            .ok_or_else(|| missing_api_key("Cohere"))
    }
}

#[async_trait]
impl ProviderDriver for CohereDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn send_request(&self, request: &Request) -> Result<Response> {
        if self.config.is_mock() {
            return mock_response("Cohere", request);
        }
        let transport = self.live()?;
        info!(provider = %self.provider_id, model = request.model(), "cohere generate");
        let reply = transport
            .post_json("/generate", &Self::build_generate_body(request))
            .await?;
        Self::parse_response(&reply, request)
    }

    async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        if self.config.is_mock() {
            return mock_stream(request);
        }
        let transport = self.live()?;
        info!(provider = %self.provider_id, model = request.model(), "cohere chat stream");
        let bytes = transport
            .post_stream("/chat", &Self::build_chat_body(request))
            .await?;
        Ok(event_stream(ndjson_values(bytes), Self::parse_stream_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn conversation() -> Request {
        Request::builder("command")
            .message(Message::system("Be brief"))
            .message(Message::user("Hi"))
            .message(Message::assistant("Hello"))
            .message(Message::user("Bye"))
            .parameter("p", 0.8)
            .parameter("top_k", 3)
            .build()
            .unwrap()
    }

    #[test]
    fn test_prompt_format() {
        assert_eq!(
            CohereDriver::build_prompt(&conversation()),
            "System: Be brief\nUser: Hi\nAssistant: Hello\nUser: Bye\n"
        );
        let body = CohereDriver::build_generate_body(&conversation());
        assert_eq!(body["p"], 0.8);
        assert!(body.get("top_k").is_none());
    }

    #[test]
    fn test_chat_body() {
        let body = CohereDriver::build_chat_body(&conversation());
        assert_eq!(body["message"], "Bye");
        assert_eq!(body["preamble"], "Be brief");
        assert_eq!(body["chat_history"][1]["role"], "CHATBOT");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_parse_response_sums_billed_units() {
        let body = json!({
            "id": "gen-1",
            "generations": [{"text": "ok", "finish_reason": "COMPLETE"}],
            "meta": {"billed_units": {"input_tokens": 5, "output_tokens": 2}}
        });
        let resp = CohereDriver::parse_response(&body, &conversation()).unwrap();
        assert_eq!(resp.total_tokens(), Some(7));
        assert_eq!(resp.finish_reason(), Some("stop"));
    }

    #[test]
    fn test_stream_events() {
        let ev = CohereDriver::parse_stream_event(&json!({"event_type": "text-generation", "text": "a"}))
            .unwrap();
        assert_eq!(ev.text.as_deref(), Some("a"));
        let end = CohereDriver::parse_stream_event(
            &json!({"event_type": "stream-end", "finish_reason": "MAX_TOKENS"}),
        )
        .unwrap();
        assert!(end.done);
        assert_eq!(end.finish_reason.as_deref(), Some("length"));
    }
}
