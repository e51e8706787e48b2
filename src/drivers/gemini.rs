//! Google Gemini generateContent driver.
//!
//! Roles map `assistant` → `model`; system turns go to `systemInstruction`;
//! sampling knobs live under `generationConfig` with camelCase names.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::info;

use super::{
    allowed_parameters, event_stream, missing_api_key, mock_response, mock_stream, split_system,
    usage_map, DriverConfig, ProviderDriver, StreamEvent,
};
use crate::error::Error;
use crate::transport::decode::sse_values;
use crate::transport::{HttpTransport, DEFAULT_TIMEOUT_SECS};
use crate::types::{MessageRole, PartialResponse, Request, Response};
use crate::{BoxStream, Result};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const ALLOWED: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("max_tokens", "maxOutputTokens"),
    ("top_p", "topP"),
    ("top_k", "topK"),
];

#[derive(Debug)]
pub struct GeminiDriver {
    provider_id: String,
    config: DriverConfig,
    transport: Option<HttpTransport>,
}

impl GeminiDriver {
    pub fn new(provider_id: impl Into<String>, config: DriverConfig) -> Result<Self> {
        let transport = match (&config.api_key, config.is_mock()) {
            (Some(key), false) if !key.is_empty() => Some(
                HttpTransport::new(
                    config.base_url_or(DEFAULT_BASE_URL),
                    Duration::from_secs(DEFAULT_TIMEOUT_SECS),
                )?
                .with_header("x-goog-api-key", key.expose()),
            ),
            _ => None,
        };
        Ok(Self {
            provider_id: provider_id.into(),
            config,
            transport,
        })
    }

    pub fn build_body(request: &Request) -> Value {
        let (system, turns) = split_system(request.messages());
        let contents: Vec<Value> = turns
            .iter()
            .map(|m| {
                let role = match m.role() {
                    MessageRole::Assistant => "model",
                    _ => "user",
                };
                json!({"role": role, "parts": [{"text": m.content()}]})
            })
            .collect();

        let mut generation = Map::new();
        if let Some(t) = request.temperature() {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(n) = request.max_tokens() {
            generation.insert("maxOutputTokens".into(), json!(n));
        }
        generation.extend(allowed_parameters("gemini", request.parameters(), ALLOWED));

        let mut body = json!({ "contents": contents });
        if let Some(sys) = system {
            body["systemInstruction"] = json!({"parts": [{"text": sys}]});
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }

    pub fn finish_reason(reason: &str) -> String {
        match reason {
            "STOP" => "stop".to_string(),
            "MAX_TOKENS" => "length".to_string(),
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => {
                "content_filter".to_string()
            }
            other => other.to_lowercase(),
        }
    }

    fn candidate_text(v: &Value) -> String {
        v.pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
            .unwrap_or_default()
    }

    pub fn parse_response(body: &Value, request: &Request) -> Result<Response> {
        let text = Self::candidate_text(body);
        if text.is_empty() {
            return Err(Error::InvalidResponse("Gemini reply has no candidate text".into()));
        }
        let usage = body
            .get("usageMetadata")
            .map(|u| {
                usage_map(
                    u["promptTokenCount"].as_u64(),
                    u["candidatesTokenCount"].as_u64(),
                    u["totalTokenCount"].as_u64(),
                )
            })
            .unwrap_or_default();

        let mut resp = Response::new(text)?
            .with_usage(usage)
            .with_model(body["modelVersion"].as_str().unwrap_or(request.model()));
        if let Some(reason) = body
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
        {
            resp = resp.with_finish_reason(Self::finish_reason(reason));
        }
        Ok(resp)
    }

    pub fn parse_stream_event(v: &Value) -> Result<StreamEvent> {
        Ok(StreamEvent {
            text: Some(Self::candidate_text(v)),
            finish_reason: v
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .map(Self::finish_reason),
            done: false,
        })
    }

    fn live(&self) -> Result<&HttpTransport> {
        self.transport
            .as_ref()
            .ok_or_else(|| missing_api_key("Gemini"))
    }
}

#[async_trait]
impl ProviderDriver for GeminiDriver {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn send_request(&self, request: &Request) -> Result<Response> {
        if self.config.is_mock() {
            return mock_response("Gemini", request);
        }
        let transport = self.live()?;
        info!(provider = %self.provider_id, model = request.model(), "gemini generateContent");
        let path = format!("/models/{}:generateContent", request.model());
        let reply = transport.post_json(&path, &Self::build_body(request)).await?;
        Self::parse_response(&reply, request)
    }

    async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        if self.config.is_mock() {
            return mock_stream(request);
        }
        let transport = self.live()?;
        info!(provider = %self.provider_id, model = request.model(), "gemini streamGenerateContent");
        let path = format!("/models/{}:streamGenerateContent?alt=sse", request.model());
        let bytes = transport.post_stream(&path, &Self::build_body(request)).await?;
        Ok(event_stream(sse_values(bytes), Self::parse_stream_event))
    }
}
