//! 配置模块：进程启动时构建一次的显式配置对象。
//!
//! Explicit settings value, built once at startup and passed as `Arc<Settings>`
//! into [`crate::McpClient`]. Environment variables are read only by
//! [`Settings::from_env`]; nothing else in the crate touches the environment.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fmt;

/// Secret string whose `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Provider credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub openai_api_key: Option<ApiKey>,
    pub openai_organization: Option<String>,
    pub cohere_api_key: Option<ApiKey>,
    pub gemini_api_key: Option<ApiKey>,
    pub anthropic_api_key: Option<ApiKey>,
    pub github_token: Option<ApiKey>,
}

impl ApiSettings {
    /// Key configured for `provider`, if any.
    pub fn key_for(&self, provider: &str) -> Option<&ApiKey> {
        match provider {
            "openai" => self.openai_api_key.as_ref(),
            "cohere" => self.cohere_api_key.as_ref(),
            "gemini" => self.gemini_api_key.as_ref(),
            "anthropic" => self.anthropic_api_key.as_ref(),
            "github" => self.github_token.as_ref(),
            _ => None,
        }
    }
}

/// Defaults for remote server connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Seconds.
    pub default_timeout: u64,
    pub default_protocol: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            default_timeout: 30,
            default_protocol: "https".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api: ApiSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub default_provider: Option<String>,
    pub default_models: HashMap<String, String>,
    pub test_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let default_models = [
            ("openai", "gpt-4"),
            ("cohere", "command"),
            ("gemini", "gemini-1.5-pro"),
            ("anthropic", "claude-3.7-sonnet-20240620"),
        ]
        .into_iter()
        .map(|(p, m)| (p.to_string(), m.to_string()))
        .collect();

        Self {
            api: ApiSettings::default(),
            server: ServerSettings::default(),
            logging: LoggingSettings::default(),
            default_provider: None,
            default_models,
            test_mode: false,
        }
    }
}

impl Settings {
    /// Defaults overridden by `MCP_*`, `MCP_SERVER_*` and `MCP_LOG_*` variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`Settings::from_env`] but reading from an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let key = |name: &str| var(name).map(ApiKey::from);
        let flag = |name: &str| {
            var(name).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        };

        let mut s = Settings::default();
        s.api.openai_api_key = key("MCP_OPENAI_API_KEY");
        s.api.openai_organization = var("MCP_OPENAI_ORGANIZATION");
        s.api.cohere_api_key = key("MCP_COHERE_API_KEY");
        s.api.gemini_api_key = key("MCP_GEMINI_API_KEY");
        s.api.anthropic_api_key = key("MCP_ANTHROPIC_API_KEY");
        s.api.github_token = key("MCP_GITHUB_TOKEN");

        if let Some(t) = var("MCP_SERVER_DEFAULT_TIMEOUT").and_then(|v| v.parse().ok()) {
            s.server.default_timeout = t;
        }
        if let Some(p) = var("MCP_SERVER_DEFAULT_PROTOCOL") {
            s.server.default_protocol = p;
        }
        if let Some(level) = var("MCP_LOG_LEVEL") {
            s.logging.level = level.to_lowercase();
        }
        if let Some(json) = flag("MCP_LOG_JSON") {
            s.logging.json = json;
        }
        s.default_provider = var("MCP_DEFAULT_PROVIDER");
        if let Some(test_mode) = flag("MCP_TEST_MODE") {
            s.test_mode = test_mode;
        }
        s
    }

    /// Parse YAML; every field is optional and falls back to its default.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn default_model(&self, provider: &str) -> Option<&str> {
        self.default_models.get(provider).map(String::as_str)
    }
}
