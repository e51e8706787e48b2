//! # omnixy
//!
//! 统一的 Model Context Protocol 客户端：一种请求/响应形态，覆盖多个 LLM 厂商与非 LLM 服务。
//!
//! Unified Model Context Protocol client. One canonical [`Request`] /
//! [`Response`] shape is routed to provider drivers (OpenAI, Anthropic, Gemini,
//! Cohere, a local Ollama-compatible runner, GitHub) or to remote servers that
//! speak the canonical shape directly.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use omnixy::{ClientConfig, CompleteOptions, McpClient, Message, Settings};
//!
//! #[tokio::main]
//! async fn main() -> omnixy::Result<()> {
//!     let settings = Arc::new(Settings::from_env());
//!     let client = McpClient::with_provider(settings, "openai", ClientConfig::default())?;
//!
//!     let reply = client
//!         .complete(CompleteOptions::new(vec![Message::user("Explain quantum entanglement")]))
//!         .await?
//!         .into_response()
//!         .await?;
//!     println!("{}", reply.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Messages, requests, responses and stream fragments |
//! | [`drivers`] | One driver per provider plus the driver factory |
//! | [`client`] | [`McpClient`] and remote server connections |
//! | [`protocol`] | Raw request validation and provider routing |
//! | [`orchestration`] | Session context chaining and plan/solve prompting |
//! | [`workflow`] | Ordered workflow steps, optionally delegated to plugins |
//! | [`plugins`] | Plugin registry |
//! | [`transport`] | HTTP transport and stream decoders |
//! | [`config`] | Explicit settings value |

pub mod client;
pub mod config;
pub mod drivers;
pub mod logging;
pub mod orchestration;
pub mod plugins;
pub mod protocol;
pub mod transport;
pub mod types;
pub mod workflow;

pub use client::{ClientConfig, CompleteOptions, Completion, McpClient, ServerConfig};
pub use config::{ApiKey, Settings};
pub use drivers::{DriverConfig, DriverFactory, ProviderDriver};
pub use orchestration::ChainOfThoughtOrchestrator;
pub use plugins::{Plugin, PluginManager};
pub use protocol::McpLayer;
pub use types::{Message, MessageRole, PartialResponse, Request, Response, ServiceKind};
pub use workflow::{Workflow, WorkflowManager};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
