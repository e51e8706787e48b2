//! Client configuration and per-call options.

use std::collections::HashMap;
use std::fmt;

use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ApiKey;
use crate::types::{Message, PartialResponse, Response};
use crate::{BoxStream, Result};

/// Temperature applied to completions built by the client.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
/// Output budget applied to completions built by the client.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Bootstrap options for the client's default provider. The provider itself is
/// named by [`McpClient::with_provider`](super::McpClient::with_provider) or
/// `Settings::default_provider`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Overrides the key found in settings.
    pub api_key: Option<ApiKey>,
    pub test_mode: bool,
    pub mock_responses: bool,
}

impl ClientConfig {
    pub fn mock() -> Self {
        Self {
            test_mode: true,
            mock_responses: true,
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<ApiKey>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Arguments to [`McpClient::complete`](super::McpClient::complete).
#[derive(Debug, Clone, Default)]
pub struct CompleteOptions {
    pub server: Option<String>,
    pub provider: Option<String>,
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub stream: bool,
    pub parameters: HashMap<String, Value>,
    pub workflow: Option<String>,
    pub plugin: Option<String>,
}

impl CompleteOptions {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn server(mut self, name: impl Into<String>) -> Self {
        self.server = Some(name.into());
        self
    }

    pub fn provider(mut self, name: impl Into<String>) -> Self {
        self.provider = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Rewrite the messages through a registered workflow first.
    pub fn workflow(mut self, name: impl Into<String>) -> Self {
        self.workflow = Some(name.into());
        self
    }

    /// Rewrite the messages through a registered plugin (after any workflow).
    pub fn plugin(mut self, name: impl Into<String>) -> Self {
        self.plugin = Some(name.into());
        self
    }
}

/// Result of a completion.
pub enum Completion {
    Response(Response),
    Stream(BoxStream<'static, PartialResponse>),
    /// Structured placeholder returned for the built-in `mock` provider.
    Raw(Value),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Response(r) => f.debug_tuple("Response").field(r).finish(),
            Completion::Stream(_) => f.write_str("Stream(..)"),
            Completion::Raw(v) => f.debug_tuple("Raw").field(v).finish(),
        }
    }
}

impl Completion {
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Completion::Response(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            Completion::Raw(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<BoxStream<'static, PartialResponse>> {
        match self {
            Completion::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Collapse any completion into one [`Response`]. Streams are drained and their
    /// fragments concatenated; raw values are read as a response mapping or as a
    /// `choices[0]` placeholder.
    pub async fn into_response(self) -> Result<Response> {
        match self {
            Completion::Response(r) => Ok(r),
            Completion::Stream(stream) => {
                let parts: Vec<PartialResponse> = stream.try_collect().await?;
                let text: String = parts.iter().map(|p| p.partial_text.as_str()).collect();
                let mut response = Response::new(text)?;
                if let Some(reason) = parts.last().and_then(PartialResponse::finish_reason) {
                    response = response.with_finish_reason(reason);
                }
                Ok(response)
            }
            Completion::Raw(value) => {
                if value.get("text").is_some() {
                    return Response::from_value(value);
                }
                let choice = &value["choices"][0];
                let mut response =
                    Response::new(choice["text"].as_str().unwrap_or_default())?;
                if let Some(reason) = choice["finish_reason"].as_str() {
                    response = response.with_finish_reason(reason);
                }
                if let Some(id) = value.get("id") {
                    response = response.with_metadata("id", id.clone());
                }
                Ok(response)
            }
        }
    }
}
