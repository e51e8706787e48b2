//! Per-provider driver configuration shapes.

use crate::config::ApiKey;
use crate::error::{Error, ErrorContext};
use crate::Result;
use serde_json::{Map, Value};
use tracing::debug;

const BASE_KEYS: &[&str] = &["test_mode", "mock_responses", "base_url"];

/// Validated driver configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverConfig {
    pub test_mode: bool,
    pub mock_responses: bool,
    pub api_key: Option<ApiKey>,
    pub organization: Option<String>,
    pub model_path: Option<String>,
    /// Overrides the provider's default API root.
    pub base_url: Option<String>,
}

/// Keys a provider's configuration shape accepts beyond the base keys.
fn extra_keys(provider: &str) -> &'static [&'static str] {
    match provider {
        "openai" => &["api_key", "organization"],
        "cohere" | "gemini" | "anthropic" | "github" => &["api_key"],
        "local" => &["model_path"],
        "mock" => &[],
        // Drivers registered at runtime get every known key.
        _ => &["api_key", "organization", "model_path"],
    }
}

impl DriverConfig {
    /// Validate a raw configuration mapping against `provider`'s shape.
    ///
    /// Unknown keys are dropped; known keys with the wrong JSON type are a
    /// configuration error. `null` counts as unset.
    pub fn from_value(provider: &str, raw: &Value) -> Result<Self> {
        let empty = Map::new();
        let map = match raw {
            Value::Object(m) => m,
            Value::Null => &empty,
            other => {
                return Err(Error::configuration_with_context(
                    "Driver configuration must be a mapping",
                    ErrorContext::new()
                        .with_details(format!("got {}", type_name(other)))
                        .with_source("driver_factory"),
                ))
            }
        };

        let allowed = extra_keys(provider);
        let mut cfg = DriverConfig::default();
        for (key, value) in map {
            if !BASE_KEYS.contains(&key.as_str()) && !allowed.contains(&key.as_str()) {
                debug!(provider, key = %key, "dropping configuration key outside the provider shape");
                continue;
            }
            if value.is_null() {
                continue;
            }
            match key.as_str() {
                "test_mode" => cfg.test_mode = expect_bool(provider, key, value)?,
                "mock_responses" => cfg.mock_responses = expect_bool(provider, key, value)?,
                "api_key" => cfg.api_key = Some(ApiKey::new(expect_str(provider, key, value)?)),
                "organization" => cfg.organization = Some(expect_str(provider, key, value)?),
                "model_path" => cfg.model_path = Some(expect_str(provider, key, value)?),
                "base_url" => cfg.base_url = Some(expect_str(provider, key, value)?),
                _ => {}
            }
        }
        Ok(cfg)
    }

    /// Test or mock mode: no network, deterministic replies.
    pub fn is_mock(&self) -> bool {
        self.test_mode || self.mock_responses
    }

    /// A non-blank API key is present.
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_ref().map(|k| !k.is_empty()).unwrap_or(false)
    }

    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url.clone().unwrap_or_else(|| default.to_string())
    }
}

fn type_error(provider: &str, key: &str, expected: &str, got: &Value) -> Error {
    Error::configuration_with_context(
        format!("Invalid value for '{}'", key),
        ErrorContext::new()
            .with_field_path(format!("{}.{}", provider, key))
            .with_details(format!("expected {}, got {}", expected, type_name(got)))
            .with_source("driver_factory"),
    )
}

fn expect_bool(provider: &str, key: &str, v: &Value) -> Result<bool> {
    v.as_bool()
        .ok_or_else(|| type_error(provider, key, "boolean", v))
}

fn expect_str(provider: &str, key: &str, v: &Value) -> Result<String> {
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| type_error(provider, key, "string", v))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
