//! Anthropic Messages API 驱动
//!
//! Anthropic Messages API driver. Differences from OpenAI:
//! - System turns go to the top-level `system` field, not `messages`.
//! - `max_tokens` is required; the canonical `max_tokens` parameter travels as
//!   `max_tokens_to_sample`.
//! - Streaming uses `content_block_delta` events carrying `delta.text`.
//! - Usage is reported as separate `input_tokens` / `output_tokens`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{
    allowed_parameters, event_stream, missing_api_key, mock_response, mock_stream, split_system,
    usage_map, DriverConfig, ProviderDriver, StreamEvent,
};
use crate::error::Error;
use crate::transport::decode::sse_values;
use crate::transport::{HttpTransport, DEFAULT_TIMEOUT_SECS};
use crate::types::{PartialResponse, Request, Response};
use crate::{BoxStream, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// A `max_tokens` parameter is sent as `max_tokens_to_sample`, which the live
/// Messages API rejects with a 400; set the request-level `max_tokens` instead.
const ALLOWED: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("max_tokens", "max_tokens_to_sample"),
    ("top_p", "top_p"),
    ("top_k", "top_k"),
];

#[derive(Debug)]
pub struct AnthropicDriver {
    provider_id: String,
    config: DriverConfig,
    transport: Option<HttpTransport>,
}

impl AnthropicDriver {
    pub fn new(provider_id: impl Into<String>, config: DriverConfig) -> Result<Self> {
        let transport = match (&config.api_key, config.is_mock()) {
            (Some(key), false) if !key.is_empty() => Some(
                HttpTransport::new(
                    config.base_url_or(DEFAULT_BASE_URL),
                    Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                )?
                .with_header("x-api-key", key.expose())
                .with_header("anthropic-version", API_VERSION),
            ),
            _ => None,
        };
        Ok(Self {
            provider_id: provider_id.into(),
            config,
            transport,
        })
    }

    pub fn build_body(request: &Request, stream: bool) -> Value {
        let (system, turns) = split_system(request.messages());
        let messages: Vec<Value> = turns
            .iter()
            .map(|m| json!({"role": m.role().as_str(), "content": m.content()}))
            .collect();

        let mut body = json!({
            "model": request.model(),
            "messages": messages,
            "max_tokens": request.max_tokens().unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }
        if let Some(t) = request.temperature() {
            body["temperature"] = json!(t);
        }
        for (k, v) in allowed_parameters("anthropic", request.parameters(), ALLOWED) {
            body[k.as_str()] = v;
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Normalize Anthropic `stop_reason` values.
    pub fn finish_reason(stop_reason: &str) -> String {
        match stop_reason {
            "end_turn" | "stop_sequence" => "stop".to_string(),
            "max_tokens" => "length".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        }
    }

    pub fn parse_response(body: &Value, request: &Request) -> Result<Response> {
        let text: String = body
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        if text.is_empty() {
            return Err(Error::InvalidResponse(
                "Anthropic reply has no text content".into(),
            ));
        }

        let usage = body
            .get("usage")
            .map(|u| usage_map(u["input_tokens"].as_u64(), u["output_tokens"].as_u64(), None))
            .unwrap_or_default();

        let mut resp = Response::new(text)?
            .with_usage(usage)
            .with_model(body["model"].as_str().unwrap_or(request.model()));
        if let Some(reason) = body.get("stop_reason").and_then(Value::as_str) {
            resp = resp.with_finish_reason(Self::finish_reason(reason));
        }
        for key in ["id", "type", "role"] {
            if let Some(v) = body.get(key).and_then(Value::as_str) {
                resp = resp.with_metadata(key, v);
            }
        }
        Ok(resp)
    }

    pub fn parse_stream_event(v: &Value) -> Result<StreamEvent> {
        match v["type"].as_str().unwrap_or("") {
            "content_block_delta" => Ok(v
                .pointer("/delta/text")
                .and_then(Value::as_str)
                .map(StreamEvent::text)
                .unwrap_or_else(StreamEvent::skip)),
            "message_delta" => Ok(StreamEvent::finish(
                v.pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                    .map(Self::finish_reason),
            )),
            "message_stop" => Ok(StreamEvent {
                done: true,
                ..Default::default()
            }),
            "error" => Err(Error::Remote {
                status: 500,
                message: v
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string(),
            }),
            _ => Ok(StreamEvent::skip()),
        }
    }
}

#[async_trait]
impl ProviderDriver for AnthropicDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn send_request(&self, request: &Request) -> Result<Response> {
        if self.config.is_mock() {
            return mock_response("Anthropic", request);
        }
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| missing_api_key("Anthropic"))?;
        info!(provider = %self.provider_id, model = request.model(), "anthropic messages call");
        let reply = transport
            .post_json("/messages", &Self::build_body(request, false))
            .await?;
        Self::parse_response(&reply, request)
    }

    async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        if self.config.is_mock() {
            return mock_stream(request);
        }
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| missing_api_key("Anthropic"))?;
        info!(provider = %self.provider_id, model = request.model(), "anthropic messages stream");
        let bytes = transport
            .post_stream("/messages", &Self::build_body(request, true))
            .await?;
        Ok(event_stream(sse_values(bytes), Self::parse_stream_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn test_system_goes_to_top_level() {
        let req = Request::builder("claude-3")
            .message(Message::system("Be helpful"))
            .message(Message::user("Hi"))
            .parameter("max_tokens", 200)
            .parameter("top_k", 5)
            .parameter("frequency_penalty", 1)
            .build()
            .unwrap();
        let body = AnthropicDriver::build_body(&req, false);
        assert_eq!(body["system"], "Be helpful");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["max_tokens_to_sample"], 200);
        assert_eq!(body["top_k"], 5);
        assert!(body.get("frequency_penalty").is_none());
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_parse_response_normalizes_stop_reason_and_usage() {
        let req = Request::new("claude-3", vec![Message::user("Hi")]).unwrap();
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-3-opus",
            "content": [{"type": "text", "text": "Hello!"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 20}
        });
        let resp = AnthropicDriver::parse_response(&body, &req).unwrap();
        assert_eq!(resp.text(), "Hello!");
        assert_eq!(resp.finish_reason(), Some("stop"));
        assert_eq!(resp.total_tokens(), Some(30));
        assert_eq!(resp.metadata()["id"], "msg_1");
    }

    #[test]
    fn test_parse_stream_events() {
        let delta = AnthropicDriver::parse_stream_event(&json!({
            "type": "content_block_delta",
            "delta": {"type": "text_delta", "text": "Hel"}
        }))
        .unwrap();
        assert_eq!(delta.text.as_deref(), Some("Hel"));

        let end = AnthropicDriver::parse_stream_event(&json!({
            "type": "message_delta",
            "delta": {"stop_reason": "max_tokens"}
        }))
        .unwrap();
        assert_eq!(end.finish_reason.as_deref(), Some("length"));

        let stop = AnthropicDriver::parse_stream_event(&json!({"type": "message_stop"})).unwrap();
        assert!(stop.done);
        assert!(AnthropicDriver::parse_stream_event(&json!({"type": "ping"}))
            .unwrap()
            .text
            .is_none());
    }
}
