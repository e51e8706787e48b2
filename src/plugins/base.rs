//! Base plugin types.

use crate::error::Error;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A named, versioned step processor.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str;

    /// Receive configuration before registration.
    fn configure(&mut self, _config: &HashMap<String, Value>) -> Result<()> {
        Ok(())
    }
    async fn initialize(&self) -> Result<bool> {
        Ok(true)
    }
    async fn shutdown(&self) -> Result<bool> {
        Ok(true)
    }
    async fn process_step(&self, data: Value) -> Result<Value>;
}

/// Bare function used as a plugin: processing is calling it.
pub type PluginFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// A registered plugin, resolved once at registration.
#[derive(Clone)]
pub enum PluginEntry {
    Named(Arc<dyn Plugin>),
    Callable { name: String, func: PluginFn },
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginEntry::Named(p) => f
                .debug_struct("Named")
                .field("name", &p.name())
                .field("version", &p.version())
                .finish(),
            PluginEntry::Callable { name, .. } => {
                f.debug_struct("Callable").field("name", name).finish()
            }
        }
    }
}

impl PluginEntry {
    pub fn callable<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        PluginEntry::Callable {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PluginEntry::Named(p) => p.name(),
            PluginEntry::Callable { name, .. } => name,
        }
    }

    /// Callables carry no version.
    pub fn version(&self) -> Option<&str> {
        match self {
            PluginEntry::Named(p) => Some(p.version()),
            PluginEntry::Callable { .. } => None,
        }
    }

    pub async fn initialize(&self) -> Result<bool> {
        match self {
            PluginEntry::Named(p) => p.initialize().await,
            PluginEntry::Callable { .. } => Ok(true),
        }
    }

    pub async fn shutdown(&self) -> Result<bool> {
        match self {
            PluginEntry::Named(p) => p.shutdown().await,
            PluginEntry::Callable { .. } => Ok(true),
        }
    }

    pub async fn process(&self, data: Value) -> Result<Value> {
        match self {
            PluginEntry::Named(p) => p.process_step(data).await,
            PluginEntry::Callable { func, .. } => func(data),
        }
    }
}

/// Declarative plugin description paired with an implementation at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginModel {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

fn enabled_default() -> bool {
    true
}

impl PluginModel {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            enabled: true,
            config: HashMap::new(),
        }
    }
}

/// Reports the model's identity while delegating processing to the implementation.
pub(crate) struct ModelPlugin {
    name: String,
    version: String,
    inner: Box<dyn Plugin>,
}

impl ModelPlugin {
    pub(crate) fn new(model: &PluginModel, mut inner: Box<dyn Plugin>) -> Result<Self> {
        if model.name.trim().is_empty() {
            return Err(Error::configuration("Plugin name cannot be empty"));
        }
        inner.configure(&model.config)?;
        Ok(Self {
            name: model.name.clone(),
            version: model.version.clone(),
            inner,
        })
    }
}

#[async_trait]
impl Plugin for ModelPlugin {
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> &str {
        &self.version
    }
    async fn initialize(&self) -> Result<bool> {
        self.inner.initialize().await
    }
    async fn shutdown(&self) -> Result<bool> {
        self.inner.shutdown().await
    }
    async fn process_step(&self, data: Value) -> Result<Value> {
        self.inner.process_step(data).await
    }
}
