//! OpenAI Chat Completions driver.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

use super::{
    allowed_parameters, event_stream, missing_api_key, mock_response, mock_stream, usage_map,
    DriverConfig, ProviderDriver, StreamEvent,
};
use crate::error::Error;
use crate::transport::decode::sse_values;
use crate::transport::{HttpTransport, DEFAULT_TIMEOUT_SECS};
use crate::types::{PartialResponse, Request, Response};
use crate::{BoxStream, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const ALLOWED: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("max_tokens", "max_tokens"),
    ("top_p", "top_p"),
    ("frequency_penalty", "frequency_penalty"),
    ("presence_penalty", "presence_penalty"),
];

#[derive(Debug)]
pub struct OpenAiDriver {
    provider_id: String,
    config: DriverConfig,
    transport: Option<HttpTransport>,
}

impl OpenAiDriver {
    pub fn new(provider_id: impl Into<String>, config: DriverConfig) -> Result<Self> {
        let transport = match (&config.api_key, config.is_mock()) {
            (Some(key), false) if !key.is_empty() => {
                let mut t = HttpTransport::new(
                    config.base_url_or(DEFAULT_BASE_URL),
                    Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                )?
                .with_bearer(key.expose());
                if let Some(org) = &config.organization {
                    t = t.with_header("OpenAI-Organization", org.as_str());
                }
                Some(t)
            }
            _ => None,
        };
        Ok(Self {
            provider_id: provider_id.into(),
            config,
            transport,
        })
    }

    fn transport(&self) -> Result<&HttpTransport> {
        self.transport
            .as_ref()
            .ok_or_else(|| missing_api_key("OpenAI"))
    }

    /// Chat completions body. System turns keep their native `system` role.
    pub fn build_body(request: &Request, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages()
            .iter()
            .map(|m| json!({"role": m.role().as_str(), "content": m.content()}))
            .collect();

        let mut body = json!({
            "model": request.model(),
            "messages": messages,
        });
        if let Some(t) = request.temperature() {
            body["temperature"] = json!(t);
        }
        if let Some(n) = request.max_tokens() {
            body["max_tokens"] = json!(n);
        }
        for (k, v) in allowed_parameters("openai", request.parameters(), ALLOWED) {
            body[k.as_str()] = v;
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    pub fn parse_response(body: &Value, request: &Request) -> Result<Response> {
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidResponse("OpenAI reply has no message content".into()))?;

        let usage = body
            .get("usage")
            .map(|u| {
                usage_map(
                    u["prompt_tokens"].as_u64(),
                    u["completion_tokens"].as_u64(),
                    u["total_tokens"].as_u64(),
                )
            })
            .unwrap_or_default();

        let mut resp = Response::new(text)?
            .with_usage(usage)
            .with_model(body["model"].as_str().unwrap_or(request.model()));
        if let Some(reason) = body.pointer("/choices/0/finish_reason").and_then(Value::as_str) {
            resp = resp.with_finish_reason(reason);
        }
        if let Some(id) = body.get("id").and_then(Value::as_str) {
            resp = resp.with_metadata("id", id);
        }
        Ok(resp)
    }

    pub fn parse_stream_event(v: &Value) -> Result<StreamEvent> {
        Ok(StreamEvent {
            text: v
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            finish_reason: v
                .pointer("/choices/0/finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            done: false,
        })
    }
}

#[async_trait]
impl ProviderDriver for OpenAiDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn send_request(&self, request: &Request) -> Result<Response> {
        if self.config.is_mock() {
            return mock_response("OpenAI", request);
        }
        let transport = self.transport()?;
        info!(provider = %self.provider_id, model = request.model(), "openai chat completion");
        let body = Self::build_body(request, false);
        let reply = transport.post_json("/chat/completions", &body).await?;
        Self::parse_response(&reply, request)
    }

    async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        if self.config.is_mock() {
            return mock_stream(request);
        }
        let transport = self.transport()?;
        info!(provider = %self.provider_id, model = request.model(), "openai chat stream");
        let body = Self::build_body(request, true);
        let bytes = transport.post_stream("/chat/completions", &body).await?;
        Ok(event_stream(sse_values(bytes), Self::parse_stream_event))
    }
}
