use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::info;

use super::{Workflow, WorkflowStep};
use crate::error::Error;
use crate::plugins::PluginManager;
use crate::Result;

/// Workflow registered by [`WorkflowManager::create_workflow`]; steps added
/// through the handle are visible to later runs.
pub type SharedWorkflow = Arc<RwLock<Workflow>>;

/// Plain function standing in for a workflow.
pub type WorkflowFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub enum WorkflowEntry {
    Defined(SharedWorkflow),
    Callable(WorkflowFn),
}

impl std::fmt::Debug for WorkflowEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowEntry::Defined(wf) => {
                let wf = wf.read().unwrap_or_else(PoisonError::into_inner);
                f.debug_tuple("Defined").field(&wf.name()).finish()
            }
            WorkflowEntry::Callable(_) => f.write_str("Callable"),
        }
    }
}

/// Name → workflow registry.
#[derive(Debug, Default)]
pub struct WorkflowManager {
    workflows: RwLock<HashMap<String, WorkflowEntry>>,
    plugins: Option<Arc<PluginManager>>,
}

impl WorkflowManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plugin steps of defined workflows run against `plugins`.
    pub fn with_plugins(plugins: Arc<PluginManager>) -> Self {
        Self {
            workflows: RwLock::default(),
            plugins: Some(plugins),
        }
    }

    fn insert(&self, name: String, entry: WorkflowEntry) {
        info!(workflow = %name, "workflow registered");
        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, entry);
    }

    /// Create and register an empty workflow.
    pub fn create_workflow(&self, name: impl Into<String>) -> SharedWorkflow {
        let name = name.into();
        let wf = Arc::new(RwLock::new(Workflow::new(name.clone())));
        self.insert(name, WorkflowEntry::Defined(wf.clone()));
        wf
    }

    pub fn register_workflow(&self, name: impl Into<String>, workflow: Workflow) {
        self.insert(
            name.into(),
            WorkflowEntry::Defined(Arc::new(RwLock::new(workflow))),
        );
    }

    pub fn register_callable<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name.into(), WorkflowEntry::Callable(Arc::new(func)));
    }

    pub fn get_workflow(&self, name: &str) -> Result<WorkflowEntry> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::WorkflowNotFound(name.to_string()))
    }

    /// Append a raw step mapping to a defined workflow.
    pub fn add_step(&self, name: &str, config: Value) -> Result<WorkflowStep> {
        match self.get_workflow(name)? {
            WorkflowEntry::Defined(wf) => wf
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .add_step(config),
            WorkflowEntry::Callable(_) => Err(Error::InvalidStepConfig(format!(
                "workflow {} is a callable and has no steps",
                name
            ))),
        }
    }

    /// Defined workflows execute with `data` as context and yield their result
    /// mapping; callables are invoked with `data`.
    pub async fn process_workflow(&self, name: &str, data: Value) -> Result<Value> {
        match self.get_workflow(name)? {
            WorkflowEntry::Defined(wf) => {
                let snapshot = wf.read().unwrap_or_else(PoisonError::into_inner).clone();
                snapshot
                    .execute(self.plugins.as_deref(), &data)
                    .await?
                    .to_value()
            }
            WorkflowEntry::Callable(func) => func(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_created_workflow_sees_added_steps() {
        let manager = WorkflowManager::new();
        let wf = manager.create_workflow("w");
        wf.write()
            .unwrap()
            .add_step(json!({"name": "a", "action": "noop"}))
            .unwrap();
        manager
            .add_step("w", json!({"name": "b", "action": "noop"}))
            .unwrap();
        let out = manager.process_workflow("w", json!({})).await.unwrap();
        assert_eq!(out["step_results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_callable_and_missing() {
        let manager = WorkflowManager::new();
        manager.register_callable("rev", |v| {
            let mut list = v.as_array().cloned().unwrap_or_default();
            list.reverse();
            Ok(Value::Array(list))
        });
        assert_eq!(
            manager.process_workflow("rev", json!([1, 2])).await.unwrap(),
            json!([2, 1])
        );
        assert!(matches!(
            manager.process_workflow("nope", json!(null)).await,
            Err(Error::WorkflowNotFound(_))
        ));
        assert!(manager.add_step("rev", json!({})).is_err());
    }

    #[tokio::test]
    async fn test_plugin_steps_use_attached_manager() {
        let plugins = Arc::new(PluginManager::new());
        plugins
            .register_callable("upper", |v| Ok(json!(v["text"].as_str().unwrap_or("").to_uppercase())))
            .unwrap();
        let manager = WorkflowManager::with_plugins(plugins);
        let mut wf = Workflow::new("shout");
        wf.add_step(json!({"name": "s", "action": "upper.run", "parameters": {"text": "hi"}}))
            .unwrap();
        manager.register_workflow("shout", wf);
        let out = manager.process_workflow("shout", json!({})).await.unwrap();
        assert_eq!(out["step_results"][0], "HI");
    }
}
