use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::connection::{McpConnection, ServerConfig};
use super::options::{
    ClientConfig, CompleteOptions, Completion, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use crate::config::Settings;
use crate::drivers::{DriverConfig, DriverFactory, ProviderDriver};
use crate::error::{Error, ErrorContext};
use crate::orchestration::{ChainOfThoughtOrchestrator, CompletionBackend};
use crate::plugins::PluginManager;
use crate::types::{Message, PartialResponse, Request, Response};
use crate::workflow::WorkflowManager;
use crate::{BoxStream, Result};

/// Name of the built-in provider that answers with a fixed placeholder.
pub const MOCK_PROVIDER: &str = "mock";

#[derive(Default)]
struct ProviderRegistry {
    drivers: HashMap<String, Arc<dyn ProviderDriver>>,
    /// Registration order, used for listing and for picking the next current provider.
    order: Vec<String>,
    current: Option<String>,
}

impl ProviderRegistry {
    fn insert(&mut self, name: String, driver: Arc<dyn ProviderDriver>) {
        if self.drivers.insert(name.clone(), driver).is_none() {
            self.order.push(name);
        }
    }

    fn remove(&mut self, name: &str) -> bool {
        if self.drivers.remove(name).is_none() {
            return false;
        }
        self.order.retain(|n| n != name);
        if self.current.as_deref() == Some(name) {
            self.current = self.order.first().cloned();
        }
        true
    }
}

/// Entry point: provider drivers, remote servers, workflows, plugins and the
/// chain-of-thought orchestrator behind one value.
pub struct McpClient {
    settings: Arc<Settings>,
    factory: DriverFactory,
    providers: RwLock<ProviderRegistry>,
    servers: RwLock<HashMap<String, Arc<McpConnection>>>,
    plugins: Arc<PluginManager>,
    workflows: WorkflowManager,
    orchestrator: ChainOfThoughtOrchestrator,
}

impl fmt::Debug for McpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers = self.providers.read().unwrap_or_else(PoisonError::into_inner);
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("McpClient")
            .field("providers", &providers.order)
            .field("current", &providers.current)
            .field("servers", &servers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl McpClient {
    /// Client with no providers, or with `settings.default_provider` registered
    /// from the settings' credentials.
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let client = Self::bare(settings);
        if let Some(provider) = client.settings.default_provider.clone() {
            client.initialize_provider(&provider, &ClientConfig::default())?;
        }
        Ok(client)
    }

    /// Client whose current provider is `provider`.
    pub fn with_provider(
        settings: Arc<Settings>,
        provider: &str,
        config: ClientConfig,
    ) -> Result<Self> {
        let client = Self::bare(settings);
        client.initialize_provider(provider, &config)?;
        Ok(client)
    }

    fn bare(settings: Arc<Settings>) -> Self {
        let plugins = Arc::new(PluginManager::new());
        Self {
            settings,
            factory: DriverFactory::new(),
            providers: RwLock::new(ProviderRegistry::default()),
            servers: RwLock::new(HashMap::new()),
            workflows: WorkflowManager::with_plugins(plugins.clone()),
            plugins,
            orchestrator: ChainOfThoughtOrchestrator::new(),
        }
    }

    fn initialize_provider(&self, provider: &str, config: &ClientConfig) -> Result<()> {
        let mut provider_config = Map::new();
        provider_config.insert(
            "test_mode".into(),
            Value::Bool(config.test_mode || self.settings.test_mode),
        );
        provider_config.insert("mock_responses".into(), Value::Bool(config.mock_responses));

        let key = config
            .api_key
            .as_ref()
            .or_else(|| self.settings.api.key_for(provider))
            .filter(|k| !k.is_empty());
        if let Some(key) = key {
            provider_config.insert("api_key".into(), Value::from(key.expose()));
        }
        if provider == "openai" {
            if let Some(org) = &self.settings.api.openai_organization {
                provider_config.insert("organization".into(), Value::from(org.as_str()));
            }
        }

        self.register_provider(provider, Value::Object(provider_config))?;
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .current = Some(provider.to_string());
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn workflows(&self) -> &WorkflowManager {
        &self.workflows
    }

    pub fn chain_of_thought(&self) -> &ChainOfThoughtOrchestrator {
        &self.orchestrator
    }

    pub fn current_provider(&self) -> Option<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Build a driver for `name` from `config` (a mapping, or null) and register it.
    ///
    /// Without a non-empty `api_key` the driver is forced into test and mock mode,
    /// so no live call is ever attempted without credentials.
    pub fn register_provider(&self, name: &str, config: Value) -> Result<()> {
        let mut config = match config {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(Error::configuration_with_context(
                    "Provider configuration must be a mapping",
                    ErrorContext::new()
                        .with_field_path(name)
                        .with_details(format!("got {}", other))
                        .with_source("register_provider"),
                ))
            }
        };
        let has_key = config
            .get("api_key")
            .and_then(Value::as_str)
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key {
            debug!(provider = name, "no api key; forcing mock mode");
            config.insert("test_mode".into(), Value::Bool(true));
            config.insert("mock_responses".into(), Value::Bool(true));
        }

        let driver = self.factory.create_driver(name, &Value::Object(config))?;
        info!(provider = name, mock = !has_key, "provider registered");
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), driver);
        Ok(())
    }

    pub fn create_provider(&self, name: &str, config: Value) -> Result<()> {
        self.register_provider(name, config)
    }

    pub fn set_provider(&self, name: &str) -> Result<()> {
        let mut providers = self.providers.write().unwrap_or_else(PoisonError::into_inner);
        if !providers.drivers.contains_key(name) {
            return Err(Error::ProviderNotRegistered(name.to_string()));
        }
        providers.current = Some(name.to_string());
        Ok(())
    }

    /// Make a new provider name available to [`register_provider`](Self::register_provider).
    pub fn register_driver<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&str, DriverConfig) -> Result<Arc<dyn ProviderDriver>> + Send + Sync + 'static,
    {
        self.factory.register_driver(name, constructor);
    }

    pub fn driver(&self, name: &str) -> Result<Arc<dyn ProviderDriver>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .drivers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProviderNotRegistered(name.to_string()))
    }

    pub fn register_server(&self, name: impl Into<String>, config: ServerConfig) -> Result<()> {
        let name = name.into();
        let config = config.resolve(&self.settings.server)?;
        let connection = McpConnection::new(config)?;
        info!(server = %name, url = %connection.base_url(), "server registered");
        self.servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(connection));
        Ok(())
    }

    fn server(&self, name: &str) -> Result<Arc<McpConnection>> {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ServerNotRegistered(name.to_string()))
    }

    /// Register `id` as a provider unless it already is. Failures are logged and
    /// reported as `false`.
    pub fn connect(&self, id: &str, config: Value) -> bool {
        if self.driver(id).is_ok() {
            return true;
        }
        match self.register_provider(id, config) {
            Ok(()) => true,
            Err(e) => {
                warn!(provider = id, error = %e, "connect failed");
                false
            }
        }
    }

    /// Remove a provider. If it was current, the earliest remaining one takes over.
    pub fn disconnect(&self, id: &str) -> bool {
        let removed = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed {
            info!(provider = id, "provider disconnected");
        }
        removed
    }

    /// Registered providers in registration order.
    pub fn list_connected_servers(&self) -> Vec<String> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    pub fn register_workflow<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.workflows.register_callable(name, func);
    }

    pub fn register_plugin<F>(&self, name: impl Into<String>, func: F) -> Result<()>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.plugins.register_callable(name, func)
    }

    /// Route a completion.
    ///
    /// Provider resolution: `options.provider`, then the current provider. Without a
    /// server the call goes to that provider's driver ([`simple_complete`](Self::simple_complete));
    /// with a server the request is sent over the server's connection. Workflow and
    /// plugin rewriting of the messages happens before the request is built.
    pub async fn complete(&self, options: CompleteOptions) -> Result<Completion> {
        let CompleteOptions {
            server,
            provider,
            messages,
            model,
            stream,
            parameters,
            workflow,
            plugin,
        } = options;
        let provider = provider.or_else(|| self.current_provider());
        let messages = self
            .rewrite_messages(messages, workflow.as_deref(), plugin.as_deref())
            .await?;

        let Some(server) = server else {
            let provider = provider.ok_or(Error::NoProviderSpecified)?;
            return self
                .simple_complete(&provider, messages, model, stream, parameters)
                .await;
        };
        let connection = self.server(&server)?;

        let model = self.resolve_model(provider.as_deref(), model)?;
        let mut builder = Request::builder(model)
            .messages(messages)
            .temperature(DEFAULT_TEMPERATURE)
            .max_tokens(DEFAULT_MAX_TOKENS)
            .stream(stream)
            .parameters(parameters);
        if let Some(p) = provider.filter(|p| self.driver(p).is_ok()) {
            builder = builder.provider(p);
        }
        let request = builder.build()?;

        debug!(server = %server, model = request.model(), stream, "remote completion");
        if stream {
            Ok(Completion::Stream(connection.stream(&request).await?))
        } else {
            Ok(Completion::Response(connection.send(&request).await?))
        }
    }

    /// Complete directly through a registered provider's driver.
    ///
    /// The `mock` provider is registered on first use and always answers with the
    /// fixed placeholder `{id, choices: [{text: "Test response", finish_reason: "stop"}]}`.
    pub async fn simple_complete(
        &self,
        provider: &str,
        messages: Vec<Message>,
        model: Option<String>,
        stream: bool,
        parameters: HashMap<String, Value>,
    ) -> Result<Completion> {
        let driver = match self.driver(provider) {
            Ok(d) => d,
            Err(_) if provider == MOCK_PROVIDER => {
                self.register_provider(
                    MOCK_PROVIDER,
                    json!({"mock_responses": true, "test_mode": true}),
                )?;
                self.driver(MOCK_PROVIDER)?
            }
            Err(e) => return Err(e),
        };

        if provider == MOCK_PROVIDER {
            return Ok(Completion::Raw(json!({
                "id": "test-response-id",
                "choices": [{"text": "Test response", "finish_reason": "stop"}],
            })));
        }

        let model = self.resolve_model(Some(provider), model)?;
        let request = Request::builder(model)
            .provider(provider)
            .messages(messages)
            .temperature(DEFAULT_TEMPERATURE)
            .max_tokens(DEFAULT_MAX_TOKENS)
            .stream(stream)
            .parameters(parameters)
            .service_kind(driver.service_kind())
            .build()?;

        if stream {
            Ok(Completion::Stream(driver.stream_tokens(&request).await?))
        } else {
            Ok(Completion::Response(driver.send_request(&request).await?))
        }
    }

    pub async fn send_request(&self, provider: &str, request: &Request) -> Result<Response> {
        self.driver(provider)?.send_request(request).await
    }

    pub async fn stream_response(
        &self,
        provider: &str,
        request: &Request,
    ) -> Result<BoxStream<'static, PartialResponse>> {
        self.driver(provider)?.stream_tokens(request).await
    }

    /// Fold `request` into its chain-of-thought session.
    pub async fn process_chain_of_thought(&self, request: Request) -> Result<Request> {
        self.orchestrator.process_request(request).await
    }

    fn resolve_model(&self, provider: Option<&str>, model: Option<String>) -> Result<String> {
        model
            .filter(|m| !m.is_empty())
            .or_else(|| {
                provider
                    .and_then(|p| self.settings.default_model(p))
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                Error::invalid_request_with_context(
                    "Model must be provided",
                    ErrorContext::new()
                        .with_field_path("model")
                        .with_details(format!("provider: {}", provider.unwrap_or("<none>")))
                        .with_source("client"),
                )
            })
    }

    async fn rewrite_messages(
        &self,
        messages: Vec<Message>,
        workflow: Option<&str>,
        plugin: Option<&str>,
    ) -> Result<Vec<Message>> {
        if workflow.is_none() && plugin.is_none() {
            return Ok(messages);
        }
        let mut data = serde_json::to_value(&messages)?;
        if let Some(name) = workflow {
            data = self.workflows.process_workflow(name, data).await?;
        }
        if let Some(name) = plugin {
            data = self.plugins.execute_plugin(name, data).await?;
        }
        serde_json::from_value(data).map_err(|e| {
            Error::invalid_request_with_context(
                "Rewritten messages are not a message list",
                ErrorContext::new()
                    .with_field_path("messages")
                    .with_details(e.to_string())
                    .with_source(workflow.or(plugin).unwrap_or_default().to_string()),
            )
        })
    }
}

#[async_trait]
impl CompletionBackend for McpClient {
    async fn complete_messages(&self, messages: Vec<Message>) -> Result<Response> {
        self.complete(CompleteOptions::new(messages))
            .await?
            .into_response()
            .await
    }
}
