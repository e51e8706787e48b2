//! Local model runner driver (Ollama-compatible `/api/chat`).
//!
//! Also backs the `mock` provider, which is always constructed in mock mode.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

use super::{
    allowed_parameters, event_stream, mock_response, mock_stream, usage_map, DriverConfig,
    ProviderDriver, StreamEvent,
};
use crate::error::Error;
use crate::transport::decode::ndjson_values;
use crate::transport::{HttpTransport, DEFAULT_TIMEOUT_SECS};
use crate::types::{PartialResponse, Request, Response};
use crate::{BoxStream, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

const ALLOWED: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("max_tokens", "num_predict"),
    ("top_p", "top_p"),
    ("top_k", "top_k"),
];

#[derive(Debug)]
pub struct LocalDriver {
    provider_id: String,
    config: DriverConfig,
    transport: Option<HttpTransport>,
}

impl LocalDriver {
    pub fn new(provider_id: impl Into<String>, config: DriverConfig) -> Result<Self> {
        let transport = if config.is_mock() {
            None
        } else {
            Some(HttpTransport::new(
                config.base_url_or(DEFAULT_BASE_URL),
                Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            )?)
        };
        Ok(Self {
            provider_id: provider_id.into(),
            config,
            transport,
        })
    }

    /// Mock-only driver for the `mock` provider.
    pub fn mock(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            config: DriverConfig {
                test_mode: true,
                mock_responses: true,
                ..Default::default()
            },
            transport: None,
        }
    }

    fn label(&self) -> &'static str {
        if self.provider_id == "mock" {
            "Mock"
        } else {
            "Local"
        }
    }

    /// Model to run: the request's, else the configured `model_path`.
    fn model_for<'a>(&'a self, request: &'a Request) -> Result<&'a str> {
        if !request.model().is_empty() {
            return Ok(request.model());
        }
        self.config.model_path.as_deref().ok_or_else(|| {
            Error::invalid_request("Local driver needs a model or a configured model_path")
        })
    }

    pub fn build_body(request: &Request, model: &str, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages()
            .iter()
            .map(|m| json!({"role": m.role().as_str(), "content": m.content()}))
            .collect();

        let mut options = Map::new();
        if let Some(t) = request.temperature() {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(n) = request.max_tokens() {
            options.insert("num_predict".into(), json!(n));
        }
        options.extend(allowed_parameters("local", request.parameters(), ALLOWED));

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": stream,
        });
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        body
    }

    pub fn parse_response(body: &Value, model: &str) -> Result<Response> {
        let text = body
            .pointer("/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidResponse("local model reply has no message".into()))?;
        let usage = usage_map(
            body["prompt_eval_count"].as_u64(),
            body["eval_count"].as_u64(),
            None,
        );
        let mut resp = Response::new(text)?
            .with_usage(usage)
            .with_model(body["model"].as_str().unwrap_or(model));
        if let Some(reason) = body["done_reason"].as_str() {
            resp = resp.with_finish_reason(reason);
        }
        Ok(resp)
    }

    pub fn parse_stream_event(v: &Value) -> Result<StreamEvent> {
        if let Some(err) = v["error"].as_str() {
            return Err(Error::Remote {
                status: 500,
                message: err.to_string(),
            });
        }
        let done = v["done"].as_bool().unwrap_or(false);
        Ok(StreamEvent {
            text: v
                .pointer("/message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
            finish_reason: if done {
                Some(v["done_reason"].as_str().unwrap_or("stop").to_string())
            } else {
                None
            },
            done,
        })
    }
}

#[async_trait]
impl ProviderDriver for LocalDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn send_request(&self, request: &Request) -> Result<Response> {
        let Some(transport) = self.transport.as_ref().filter(|_| !self.config.is_mock()) else {
            return mock_response(self.label(), request);
        };
        let model = self.model_for(request)?;
        info!(provider = %self.provider_id, model, "local chat");
        let reply = transport
            .post_json("/api/chat", &Self::build_body(request, model, false))
            .await?;
        Self::parse_response(&reply, model)
    }

    async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        let Some(transport) = self.transport.as_ref().filter(|_| !self.config.is_mock()) else {
            return mock_stream(request);
        };
        let model = self.model_for(request)?;
        info!(provider = %self.provider_id, model, "local chat stream");
        let bytes = transport
            .post_stream("/api/chat", &Self::build_body(request, model, true))
            .await?;
        Ok(event_stream(ndjson_values(bytes), Self::parse_stream_event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn test_build_body_options() {
        let req = Request::builder("llama3")
            .message(Message::user("hi"))
            .max_tokens(32)
            .parameter("top_k", 40)
            .parameter("presence_penalty", 1)
            .build()
            .unwrap();
        let body = LocalDriver::build_body(&req, "llama3", false);
        assert_eq!(body["options"]["num_predict"], 32);
        assert_eq!(body["options"]["top_k"], 40);
        assert!(body["options"].get("presence_penalty").is_none());
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_model_path_fallback() {
        let driver = LocalDriver::new(
            "local",
            DriverConfig {
                model_path: Some("/models/llama.gguf".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let req = Request::new("", vec![Message::user("hi")]).unwrap();
        assert_eq!(driver.model_for(&req).unwrap(), "/models/llama.gguf");
    }

    #[test]
    fn test_stream_done_carries_reason() {
        let ev = LocalDriver::parse_stream_event(&json!({
            "message": {"role": "assistant", "content": ""},
            "done": true,
            "done_reason": "length"
        }))
        .unwrap();
        assert!(ev.done);
        assert_eq!(ev.finish_reason.as_deref(), Some("length"));
    }

    #[tokio::test]
    async fn test_mock_driver_label() {
        let req = Request::new("any", vec![Message::user("hi")]).unwrap();
        let resp = LocalDriver::mock("mock").send_request(&req).await.unwrap();
        assert_eq!(resp.text(), "This is a mock response from Mock for testing purposes.");
    }
}
