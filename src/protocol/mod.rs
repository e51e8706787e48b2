//! 协议层：原始请求校验与按 provider 路由。
//!
//! # MCP Layer
//!
//! Entry point for callers holding raw request mappings (for example, a server
//! decoding HTTP bodies). [`McpLayer`] validates and parses them into
//! [`Request`]s, formats outgoing responses, and routes requests to the driver
//! named by `request.provider`, or by the `provider/` prefix of `request.model`
//! when no provider is set.
//!
//! ```rust
//! use omnixy::protocol::McpLayer;
//! use serde_json::json;
//!
//! let layer = McpLayer::new();
//! let req = layer
//!     .process_request(&json!({
//!         "model": "openai/gpt-4",
//!         "messages": [{"role": "user", "content": "hi"}]
//!     }))
//!     .unwrap();
//! assert_eq!(req.model(), "openai/gpt-4");
//! ```

pub mod validator;

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::drivers::ProviderDriver;
use crate::error::Error;
use crate::types::{PartialResponse, Request, Response};
use crate::{BoxStream, Result};

pub use validator::validate_request_value;

/// Request validation, response formatting and provider routing over a fixed driver set.
#[derive(Debug, Default, Clone)]
pub struct McpLayer {
    drivers: HashMap<String, Arc<dyn ProviderDriver>>,
}

impl McpLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drivers(drivers: HashMap<String, Arc<dyn ProviderDriver>>) -> Self {
        Self { drivers }
    }

    pub fn add_driver(&mut self, name: impl Into<String>, driver: Arc<dyn ProviderDriver>) {
        self.drivers.insert(name.into(), driver);
    }

    pub fn validate_request(&self, data: &Value) -> Result<()> {
        validate_request_value(data)
    }

    /// Validate then parse a raw mapping.
    pub fn process_request(&self, data: &Value) -> Result<Request> {
        self.validate_request(data)?;
        Request::from_value(data.clone())
    }

    /// Standardized `{text, usage, model, finish_reason, metadata}` view of a raw response.
    pub fn format_response(&self, data: &Value) -> Value {
        json!({
            "text": data.get("text").cloned().unwrap_or_else(|| json!("")),
            "usage": data.get("usage").cloned().unwrap_or_else(|| json!({})),
            "model": data.get("model").cloned().unwrap_or(Value::Null),
            "finish_reason": data.get("finish_reason").cloned().unwrap_or(Value::Null),
            "metadata": data.get("metadata").cloned().unwrap_or_else(|| json!({})),
        })
    }

    /// Provider that should handle `request`.
    pub fn resolve_provider(request: &Request) -> Option<&str> {
        match request.provider() {
            Some(p) if !p.is_empty() => Some(p),
            _ => request
                .model()
                .split_once('/')
                .map(|(provider, _)| provider),
        }
    }

    fn driver_for(&self, request: &Request) -> Result<&Arc<dyn ProviderDriver>> {
        let provider = Self::resolve_provider(request).unwrap_or_default();
        self.drivers
            .get(provider)
            .ok_or_else(|| Error::ProviderNotRegistered(provider.to_string()))
    }

    pub async fn send_request(&self, request: &Request) -> Result<Response> {
        self.driver_for(request)?.send_request(request).await
    }

    pub async fn stream_tokens(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        self.driver_for(request)?.stream_tokens(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::LocalDriver;
    use crate::types::Message;

    fn layer() -> McpLayer {
        let mut layer = McpLayer::new();
        layer.add_driver("mock", Arc::new(LocalDriver::mock("mock")));
        layer
    }

    #[test]
    fn test_process_request_rejects_bad_shape() {
        let err = layer()
            .process_request(&json!({"model": "m", "messages": [{"content": "x"}]}))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));

        for raw in [
            json!({"model": "m", "messages": [{"role": "tool", "content": "x"}]}),
            json!({"model": 5, "messages": [{"role": "user", "content": "x"}]}),
        ] {
            let err = layer().process_request(&raw).unwrap_err();
            assert!(matches!(err, Error::InvalidRequest { .. }), "{raw}");
        }
    }

    #[test]
    fn test_format_response_fills_defaults() {
        let out = layer().format_response(&json!({"text": "hi", "extra": 1}));
        assert_eq!(
            out,
            json!({"text": "hi", "usage": {}, "model": null, "finish_reason": null, "metadata": {}})
        );
    }

    #[test]
    fn test_model_prefix_routing() {
        let req = Request::new("mock/tiny", vec![Message::user("x")]).unwrap();
        assert_eq!(McpLayer::resolve_provider(&req), Some("mock"));
        let explicit = req.clone().with_provider("openai");
        assert_eq!(McpLayer::resolve_provider(&explicit), Some("openai"));
        let bare = Request::new("gpt-4", vec![Message::user("x")]).unwrap();
        assert_eq!(McpLayer::resolve_provider(&bare), None);
    }

    #[tokio::test]
    async fn test_send_routes_to_driver() {
        let req = Request::new("mock/tiny", vec![Message::user("x")]).unwrap();
        let resp = layer().send_request(&req).await.unwrap();
        assert!(resp.text().contains("Mock"));

        let missing = Request::new("gpt-4", vec![Message::user("x")]).unwrap();
        assert!(matches!(
            layer().send_request(&missing).await,
            Err(Error::ProviderNotRegistered(_))
        ));
    }
}
