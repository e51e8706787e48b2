//! Connection to a remote server that speaks the canonical request/response shape.
//!
//! `POST {protocol}://{url}/complete` takes a serialized [`Request`] and answers
//! with a [`Response`] mapping. `POST {protocol}://{url}/stream` answers with
//! newline-delimited [`PartialResponse`] mappings.

use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ServerSettings;
use crate::error::{Error, ErrorContext};
use crate::transport::{decode, HttpTransport};
use crate::types::{PartialResponse, Request, Response};
use crate::{BoxStream, Result};

/// Server registration. `protocol` and `timeout` (seconds) fall back to the
/// settings' server defaults when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl ServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Fill unset fields from `defaults`; a missing URL is a configuration error.
    pub fn resolve(mut self, defaults: &ServerSettings) -> Result<Self> {
        if self.url.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "Server configuration must include a URL",
                ErrorContext::new()
                    .with_field_path("url")
                    .with_source("register_server"),
            ));
        }
        let protocol = self
            .protocol
            .get_or_insert_with(|| defaults.default_protocol.clone());
        let endpoint = format!("{}://{}", protocol, self.url.trim_end_matches('/'));
        if let Err(e) = url::Url::parse(&endpoint) {
            return Err(Error::configuration_with_context(
                format!("Invalid server URL: {}", endpoint),
                ErrorContext::new()
                    .with_field_path("url")
                    .with_details(e.to_string())
                    .with_source("register_server"),
            ));
        }
        self.timeout.get_or_insert(defaults.default_timeout);
        Ok(self)
    }
}

#[derive(Debug, Clone)]
pub struct McpConnection {
    config: ServerConfig,
    transport: HttpTransport,
}

impl McpConnection {
    /// `config` must already be resolved.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let protocol = config.protocol.as_deref().unwrap_or("https");
        let base_url = format!("{}://{}", protocol, config.url.trim_end_matches('/'));
        let timeout = Duration::from_secs(config.timeout.unwrap_or(30));
        let mut transport = HttpTransport::new(base_url, timeout)?;
        for (name, value) in &config.headers {
            transport = transport.with_header(name.as_str(), value.as_str());
        }
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub async fn send(&self, request: &Request) -> Result<Response> {
        let body = request.to_value()?;
        let value = self.transport.post_json("/complete", &body).await?;
        Response::from_value(value)
    }

    /// Ends after the first final fragment. A body that closes without one gets an
    /// empty final fragment appended.
    pub async fn stream(&self, request: &Request) -> Result<BoxStream<'static, PartialResponse>> {
        let body = request.to_value()?;
        let bytes = self.transport.post_stream("/stream", &body).await?;
        let values = decode::ndjson_values(bytes);
        debug!(server = %self.config.url, "remote stream opened");
        Ok(Box::pin(async_stream::try_stream! {
            let mut values = values;
            let mut finished = false;
            while let Some(value) = values.next().await {
                let part = PartialResponse::from_value(value?)?;
                let is_final = part.is_final;
                yield part;
                if is_final {
                    finished = true;
                    break;
                }
            }
            if !finished {
                yield PartialResponse::final_chunk("");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_fills_defaults() {
        let defaults = ServerSettings::default();
        let cfg = ServerConfig::new("api.example.com").resolve(&defaults).unwrap();
        assert_eq!(cfg.protocol.as_deref(), Some("https"));
        assert_eq!(cfg.timeout, Some(30));

        let cfg = ServerConfig::new("localhost:8080")
            .with_protocol("http")
            .with_timeout(5)
            .resolve(&defaults)
            .unwrap();
        assert_eq!(cfg.protocol.as_deref(), Some("http"));
        assert_eq!(cfg.timeout, Some(5));
    }

    #[test]
    fn test_missing_url() {
        let cfg: ServerConfig = serde_json::from_value(json!({"protocol": "http"})).unwrap();
        let err = cfg.resolve(&ServerSettings::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let bad = ServerConfig::new("host:notaport").resolve(&ServerSettings::default());
        assert!(matches!(bad, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_base_url() {
        let cfg = ServerConfig::new("localhost:9000/")
            .with_protocol("http")
            .resolve(&ServerSettings::default())
            .unwrap();
        let conn = McpConnection::new(cfg).unwrap();
        assert_eq!(conn.base_url(), "http://localhost:9000");
    }
}
