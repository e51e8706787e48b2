//! Plugin registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, info};

use super::base::{ModelPlugin, Plugin, PluginEntry, PluginModel};
use crate::error::Error;
use crate::Result;

/// Name → plugin registry. Registering an existing name overwrites it.
#[derive(Debug, Default)]
pub struct PluginManager {
    plugins: RwLock<HashMap<String, PluginEntry>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_entry(&self, entry: PluginEntry) -> Result<()> {
        let name = entry.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::configuration("Plugin name cannot be empty"));
        }
        info!(plugin = %name, "plugin registered");
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, entry);
        Ok(())
    }

    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.register_entry(PluginEntry::Named(plugin))
    }

    /// Register a bare function under `name`.
    pub fn register_callable<F>(&self, name: impl Into<String>, func: F) -> Result<()>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_entry(PluginEntry::callable(name, func))
    }

    /// Register `implementation` under the model's name and version, passing it the
    /// model's config. `enabled` is informational: disabled models register too.
    pub fn register_plugin_from_model(
        &self,
        model: PluginModel,
        implementation: Box<dyn Plugin>,
    ) -> Result<bool> {
        let wrapped = ModelPlugin::new(&model, implementation)?;
        self.register_plugin(Arc::new(wrapped))?;
        Ok(true)
    }

    pub fn get_plugins(&self) -> HashMap<String, PluginEntry> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_plugin(&self, name: &str) -> Result<PluginEntry> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound(name.to_string()))
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub async fn initialize_plugin(&self, name: &str) -> Result<bool> {
        self.get_plugin(name)?.initialize().await
    }

    pub async fn shutdown_plugin(&self, name: &str) -> Result<bool> {
        self.get_plugin(name)?.shutdown().await
    }

    /// Run a plugin's processing capability on `data`.
    pub async fn execute_plugin(&self, name: &str, data: Value) -> Result<Value> {
        // Clone the entry out so the lock is not held across the await.
        let entry = self.get_plugin(name)?;
        debug!(plugin = name, "executing plugin");
        entry.process(data).await
    }
}
