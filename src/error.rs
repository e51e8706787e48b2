use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.messages[0].role")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "driver_factory", "request_validator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the MCP client.
///
/// Every failure is raised to the immediate caller; nothing in this crate retries
/// or fails over between providers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Unsupported {provider} action: {action}")]
    UnsupportedAction { provider: String, action: String },

    #[error("Provider {0} not registered")]
    ProviderNotRegistered(String),

    #[error("Server {0} not registered")]
    ServerNotRegistered(String),

    #[error("Plugin {0} not registered")]
    PluginNotFound(String),

    #[error("Workflow {0} not registered")]
    WorkflowNotFound(String),

    #[error("No provider specified and no default provider is set")]
    NoProviderSpecified,

    #[error("Invalid request: {message}{}", format_context(.context))]
    InvalidRequest {
        message: String,
        context: ErrorContext,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model '{0}' does not exist")]
    InvalidModel(String),

    #[error("Plugin manager required for plugin steps")]
    PluginManagerRequired,

    #[error("Invalid step configuration: {0}")]
    InvalidStepConfig(String),

    #[error("Plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },

    #[error("Remote error: HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Configuration error without extra context.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::configuration_with_context(msg, ErrorContext::new())
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Request-shape violation without extra context.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::invalid_request_with_context(msg, ErrorContext::new())
    }

    pub fn invalid_request_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::InvalidRequest {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::InvalidRequest { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// True for registry lookup misses (provider, server, plugin, workflow).
    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Error::ProviderNotRegistered(_)
                | Error::ServerNotRegistered(_)
                | Error::PluginNotFound(_)
                | Error::WorkflowNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_rendered() {
        let err = Error::invalid_request_with_context(
            "Each message must have role and content",
            ErrorContext::new()
                .with_field_path("messages[1]")
                .with_source("request_validator"),
        );
        let text = err.to_string();
        assert!(text.contains("messages[1]"));
        assert!(text.contains("request_validator"));
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("messages[1]")
        );
    }

    #[test]
    fn test_plain_errors_have_no_context() {
        assert!(Error::NoProviderSpecified.context().is_none());
        assert_eq!(
            Error::InvalidModel("non-existent-model".into()).to_string(),
            "Model 'non-existent-model' does not exist"
        );
    }

    #[test]
    fn test_lookup_miss_classification() {
        assert!(Error::PluginNotFound("p".into()).is_lookup_miss());
        assert!(!Error::PluginManagerRequired.is_lookup_miss());
    }
}
