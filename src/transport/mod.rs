//! HTTP transport and stream framing used by live drivers and remote servers.

pub mod decode;
pub mod http;

pub use http::{HttpTransport, DEFAULT_TIMEOUT_SECS};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
