//! 客户端模块：统一的补全入口。
//!
//! Unified client. The public surface is [`McpClient`] plus its options; the
//! remote-server wire protocol lives in [`connection`].

pub mod connection;
pub mod core;
pub mod options;

pub use connection::{McpConnection, ServerConfig};
pub use self::core::{McpClient, MOCK_PROVIDER};
pub use options::{
    ClientConfig, CompleteOptions, Completion, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
