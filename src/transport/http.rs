use crate::transport::TransportError;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default request timeout for provider APIs, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Thin JSON-over-HTTP transport shared by the live drivers and remote server connections.
///
/// Holds a base URL and a fixed header set; every call is a single request with no retry.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: Vec::new(),
        })
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {}", token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        let req = self.apply_headers(self.client.post(&url).json(body));
        let resp = req.send().await.map_err(TransportError::Http)?;
        read_json(resp).await
    }

    pub async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        let req = self.apply_headers(self.client.get(&url).query(query));
        let resp = req.send().await.map_err(TransportError::Http)?;
        read_json(resp).await
    }

    /// POST and hand back the raw body as a byte stream; the connection closes when
    /// the stream is dropped.
    pub async fn post_stream(&self, path: &str, body: &Value) -> Result<BoxStream<'static, Bytes>> {
        let url = self.url(path);
        debug!(url = %url, "POST (stream)");
        let req = self.apply_headers(
            self.client
                .post(&url)
                .header("accept", "text/event-stream")
                .json(body),
        );
        let resp = req.send().await.map_err(TransportError::Http)?;
        let resp = check_status(resp).await?;
        let bytes = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e)));
        Ok(Box::pin(bytes))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(Error::Remote {
        status: status.as_u16(),
        message: error_message(&text),
    })
}

async fn read_json(resp: reqwest::Response) -> Result<Value> {
    let resp = check_status(resp).await?;
    let json = resp.json().await.map_err(TransportError::Http)?;
    Ok(json)
}

/// Pull a readable message out of a provider error body.
fn error_message(body: &str) -> String {
    let Ok(v) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    v.pointer("/error/message")
        .or_else(|| v.get("message"))
        .or_else(|| v.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
