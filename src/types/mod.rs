//! 类型模块：统一的请求/响应数据形状。
//!
//! # Types Module
//!
//! The canonical shapes every driver, remote server and orchestrator speaks.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | One conversation turn (`system`, `user`, `assistant`) |
//! | [`Request`] | Model Context Protocol request; validated on construction |
//! | [`Response`] | Full reply with usage, finish reason and `plugin_data` |
//! | [`PartialResponse`] | One streamed fragment; the last one is final |
//! | [`ServiceKind`] | LLM vs non-LLM classification of a request or driver |
//!
//! ```rust
//! use omnixy::types::{Message, Request};
//!
//! let req = Request::builder("gpt-4")
//!     .message(Message::system("You are terse."))
//!     .message(Message::user("Hello"))
//!     .temperature(0.2)
//!     .build()
//!     .unwrap();
//! assert_eq!(req.messages().len(), 2);
//!
//! // Non-LLM services may omit the conversation entirely.
//! assert!(Request::new("github", vec![]).is_ok());
//! ```

pub mod message;
pub mod request;
pub mod response;

pub use message::{Message, MessageRole};
pub use request::{Request, RequestBuilder, RequestData, ServiceKind, NON_LLM_SERVICES};
pub use response::{PartialResponse, Response};
