//! 工作流模块：按声明顺序执行的命名步骤。
//!
//! A [`Workflow`] runs its steps in order. A step whose action has the dotted
//! form `plugin.method` is delegated to a [`PluginManager`]; any other step is
//! recorded by the default handler as `{"step": name, "result": "Executed name"}`.

pub mod manager;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::plugins::PluginManager;
use crate::Result;

pub use manager::{SharedWorkflow, WorkflowEntry, WorkflowFn, WorkflowManager};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepModel {
    pub name: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowModel {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStepModel>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub name: String,
    pub action: String,
    pub parameters: serde_json::Map<String, Value>,
}

impl WorkflowStep {
    /// `(plugin, method)` when the action is a plugin call.
    pub fn plugin_target(&self) -> Option<(&str, &str)> {
        self.action.split_once('.')
    }

    pub fn to_model(&self) -> WorkflowStepModel {
        WorkflowStepModel {
            name: self.name.clone(),
            action: self.action.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl From<WorkflowStepModel> for WorkflowStep {
    fn from(m: WorkflowStepModel) -> Self {
        Self {
            name: m.name,
            action: m.action,
            parameters: m.parameters,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    pub step_results: Vec<Value>,
}

impl WorkflowResult {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    id: String,
    name: String,
    steps: Vec<WorkflowStep>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// Validate a raw step mapping (`name`, `action`, optional `parameters`) and append it.
    pub fn add_step(&mut self, config: Value) -> Result<WorkflowStep> {
        let model: WorkflowStepModel = serde_json::from_value(config)
            .map_err(|e| Error::InvalidStepConfig(e.to_string()))?;
        Ok(self.push_step(model))
    }

    pub fn push_step(&mut self, model: WorkflowStepModel) -> WorkflowStep {
        let step = WorkflowStep::from(model);
        self.steps.push(step.clone());
        step
    }

    /// Run every step in order. The first failure aborts the run and is returned as-is.
    pub async fn execute(
        &self,
        plugins: Option<&PluginManager>,
        context: &Value,
    ) -> Result<WorkflowResult> {
        let mut step_results = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let result = match step.plugin_target() {
                Some((plugin, _method)) => {
                    let manager = plugins.ok_or(Error::PluginManagerRequired)?;
                    manager
                        .execute_plugin(plugin, Value::Object(step.parameters.clone()))
                        .await?
                }
                None => Self::execute_step(step, context),
            };
            step_results.push(result);
        }
        debug!(workflow = %self.name, steps = step_results.len(), "workflow completed");
        Ok(WorkflowResult {
            status: WorkflowStatus::Completed,
            step_results,
        })
    }

    fn execute_step(step: &WorkflowStep, _context: &Value) -> Value {
        json!({"step": step.name, "result": format!("Executed {}", step.name)})
    }

    pub fn to_model(&self) -> WorkflowModel {
        WorkflowModel {
            name: self.name.clone(),
            steps: self.steps.iter().map(WorkflowStep::to_model).collect(),
        }
    }

    /// Fresh workflow (new id) with the model's steps.
    pub fn from_model(model: WorkflowModel) -> Self {
        let mut wf = Workflow::new(model.name);
        for step in model.steps {
            wf.push_step(step);
        }
        wf
    }
}
