//! Provider name → driver constructor table.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use super::{
    AnthropicDriver, CohereDriver, DriverConfig, GeminiDriver, LocalDriver, OpenAiDriver,
    ProviderDriver,
};
use crate::error::Error;
use crate::Result;

/// Builds a driver from the provider name it is registered under and its validated config.
pub type DriverConstructor =
    Arc<dyn Fn(&str, DriverConfig) -> Result<Arc<dyn ProviderDriver>> + Send + Sync>;

/// Runtime-extensible driver registry.
///
/// Ships with `openai`, `cohere`, `gemini`, `anthropic`, `local` and `mock`;
/// anything else (a GitHub integration, a test double) is added with
/// [`DriverFactory::register_driver`].
pub struct DriverFactory {
    constructors: RwLock<HashMap<String, DriverConstructor>>,
}

impl std::fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverFactory")
            .field("providers", &self.providers())
            .finish()
    }
}

impl Default for DriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory {
    pub fn new() -> Self {
        let factory = Self {
            constructors: RwLock::new(HashMap::new()),
        };
        factory.insert("openai", |name, cfg| {
            Ok(Arc::new(OpenAiDriver::new(name, cfg)?) as Arc<dyn ProviderDriver>)
        });
        factory.insert("cohere", |name, cfg| {
            Ok(Arc::new(CohereDriver::new(name, cfg)?) as Arc<dyn ProviderDriver>)
        });
        factory.insert("gemini", |name, cfg| {
            Ok(Arc::new(GeminiDriver::new(name, cfg)?) as Arc<dyn ProviderDriver>)
        });
        factory.insert("anthropic", |name, cfg| {
            Ok(Arc::new(AnthropicDriver::new(name, cfg)?) as Arc<dyn ProviderDriver>)
        });
        factory.insert("local", |name, cfg| {
            Ok(Arc::new(LocalDriver::new(name, cfg)?) as Arc<dyn ProviderDriver>)
        });
        factory.insert("mock", |name, _cfg| {
            Ok(Arc::new(LocalDriver::mock(name)) as Arc<dyn ProviderDriver>)
        });
        factory
    }

    /// Bind (or rebind) `name` to a constructor.
    pub fn register_driver<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&str, DriverConfig) -> Result<Arc<dyn ProviderDriver>> + Send + Sync + 'static,
    {
        let name = name.into();
        info!(provider = %name, "driver registered");
        self.insert(name, constructor);
    }

    fn insert<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&str, DriverConfig) -> Result<Arc<dyn ProviderDriver>> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(constructor));
    }

    /// Validate `config` against the provider's shape and build a driver.
    pub fn create_driver(&self, name: &str, config: &Value) -> Result<Arc<dyn ProviderDriver>> {
        let constructor = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProvider(name.to_string()))?;
        let config = DriverConfig::from_value(name, config)?;
        constructor(name, config)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
