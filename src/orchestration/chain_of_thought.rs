//! Chain-of-thought orchestration.
//!
//! Two independent modes share this type:
//!
//! - **Session chaining**: [`ChainOfThoughtOrchestrator::process_request`] folds every
//!   request retained for a session into the current one, evicting the oldest
//!   requests while the combined word count exceeds the request's budget.
//! - **Plan/solve**: named prompt templates run in order through a
//!   [`CompletionBackend`], each able to reference earlier answers as
//!   `{step_response}` placeholders.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use super::store::{ContextStore, MemoryContextStore};
use crate::error::Error;
use crate::types::{Message, Request, Response};
use crate::Result;

pub const DEFAULT_SESSION: &str = "default";
pub const DEFAULT_TOKEN_BUDGET: usize = 4096;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{([^{}]*)\}").expect("placeholder pattern is valid"));

/// Where plan/solve sends each formatted prompt.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete_messages(&self, messages: Vec<Message>) -> Result<Response>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub name: String,
    pub prompt: String,
}

impl PlanStep {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: prompt.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    /// The prompt actually sent, after placeholder substitution.
    pub prompt: String,
    pub response: Response,
}

impl StepOutcome {
    pub fn text(&self) -> &str {
        self.response.text()
    }
}

struct Retained {
    request: Request,
    words: usize,
}

#[derive(Default)]
struct Session {
    retained: VecDeque<Retained>,
    words: usize,
}

impl Session {
    fn push(&mut self, request: Request) {
        let words = request.messages().iter().map(Message::word_count).sum();
        self.words += words;
        self.retained.push_back(Retained { request, words });
    }

    fn evict_oldest(&mut self) {
        if let Some(old) = self.retained.pop_front() {
            self.words -= old.words;
        }
    }

    fn flattened(&self) -> Vec<Message> {
        self.retained
            .iter()
            .flat_map(|r| r.request.messages().iter().cloned())
            .collect()
    }

    fn snapshot(&self) -> Result<String> {
        let requests = self
            .retained
            .iter()
            .map(|r| r.request.to_value())
            .collect::<Result<Vec<_>>>()?;
        Ok(serde_json::to_string(&requests)?)
    }
}

pub struct ChainOfThoughtOrchestrator {
    store: Arc<dyn ContextStore>,
    sessions: Mutex<HashMap<String, Arc<AsyncMutex<Session>>>>,
    steps: Vec<PlanStep>,
    context: HashMap<String, Value>,
}

impl fmt::Debug for ChainOfThoughtOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainOfThoughtOrchestrator")
            .field("store", &self.store.name())
            .field("steps", &self.steps)
            .finish()
    }
}

impl Default for ChainOfThoughtOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainOfThoughtOrchestrator {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryContextStore::new()))
    }

    pub fn with_store(store: Arc<dyn ContextStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            steps: Vec::new(),
            context: HashMap::new(),
        }
    }

    fn session(&self, id: &str) -> Arc<AsyncMutex<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    fn store_key(session_id: &str) -> String {
        format!("context:{}", session_id)
    }

    /// Retain `request` in its session (`metadata.session_id`, default `"default"`) and
    /// replace its messages with every retained request's messages, oldest first.
    ///
    /// While the combined word count exceeds `parameters.max_tokens` (default 4096) the
    /// oldest retained request is dropped. The request being processed is never dropped.
    pub async fn process_request(&self, mut request: Request) -> Result<Request> {
        let session_id = request
            .metadata_str("session_id")
            .unwrap_or(DEFAULT_SESSION)
            .to_string();
        let budget = request
            .parameters()
            .get("max_tokens")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_TOKEN_BUDGET);

        let session = self.session(&session_id);
        let mut session = session.lock().await;
        session.push(request.clone());

        if session.retained.len() > 1 {
            while session.words > budget && session.retained.len() > 1 {
                session.evict_oldest();
            }
            debug!(
                session = %session_id,
                retained = session.retained.len(),
                words = session.words,
                "session context combined"
            );
            request.set_messages(session.flattened());
        }

        let snapshot = session.snapshot()?;
        self.store
            .set(&Self::store_key(&session_id), &snapshot)
            .await?;
        Ok(request)
    }

    /// Requests currently retained for `session_id`, oldest first.
    pub async fn session_requests(&self, session_id: &str) -> Vec<Request> {
        let session = self.session(session_id);
        let session = session.lock().await;
        session.retained.iter().map(|r| r.request.clone()).collect()
    }

    pub async fn clear_context(&self, session_id: &str) -> Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        self.store.delete(&Self::store_key(session_id)).await?;
        Ok(())
    }

    /// Validate and append a `{name, prompt}` step.
    pub fn add_step(&mut self, config: Value) -> Result<()> {
        let obj = config
            .as_object()
            .ok_or_else(|| Error::InvalidStepConfig("Step config must be a mapping".into()))?;
        let prompt = obj
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::InvalidStepConfig("Prompt cannot be empty".into()))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidStepConfig("Step config must contain name".into()))?;
        self.steps.push(PlanStep::new(name, prompt));
        Ok(())
    }

    /// Append steps as given. They still run one after another in [`solve`](Self::solve).
    pub fn add_parallel_steps(&mut self, steps: impl IntoIterator<Item = PlanStep>) {
        self.steps.extend(steps);
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Template arguments available to every step prompt.
    pub fn set_context(&mut self, context: HashMap<String, Value>) {
        self.context = context;
    }

    pub async fn solve(&self, backend: &dyn CompletionBackend) -> Result<Vec<StepOutcome>> {
        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let mut args: HashMap<String, String> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), display_value(v)))
                .collect();
            for done in &outcomes {
                args.insert(format!("{}_response", done.name), done.text().to_string());
            }

            let prompt = match render_template(&step.prompt, &args) {
                Some(p) => p,
                None => {
                    warn!(step = %step.name, "prompt placeholder missing; sending template unformatted");
                    step.prompt.clone()
                }
            };
            let response = backend
                .complete_messages(vec![Message::user(prompt.clone())])
                .await?;
            outcomes.push(StepOutcome {
                name: step.name.clone(),
                prompt,
                response,
            });
        }
        Ok(outcomes)
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{key}` placeholders; `{{` and `}}` are literal braces.
/// `None` when any placeholder has no argument.
fn render_template(template: &str, args: &HashMap<String, String>) -> Option<String> {
    let mut missing = false;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures<'_>| match caps.get(1) {
        Some(key) => match args.get(key.as_str()) {
            Some(v) => v.clone(),
            None => {
                missing = true;
                String::new()
            }
        },
        None if &caps[0] == "{{" => "{".to_string(),
        None => "}".to_string(),
    });
    if missing {
        None
    } else {
        Some(rendered.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl CompletionBackend for Echo {
        async fn complete_messages(&self, messages: Vec<Message>) -> Result<Response> {
            let last = messages.last().map(Message::content).unwrap_or_default();
            Response::new(format!("Processed: {}", last))
        }
    }

    fn words(n: usize) -> String {
        vec!["w"; n].join(" ")
    }

    fn req(content: &str, session: &str, budget: u64) -> Request {
        Request::builder("gpt-4")
            .message(Message::user(content))
            .metadata("session_id", session)
            .parameter("max_tokens", budget)
            .build()
            .unwrap()
    }

    #[test]
    fn test_render_template() {
        let mut args = HashMap::new();
        args.insert("data".to_string(), "test data".to_string());
        assert_eq!(
            render_template("Analyze {data} {{raw}}", &args).as_deref(),
            Some("Analyze test data {raw}")
        );
        assert!(render_template("Use {missing}", &args).is_none());
    }

    #[tokio::test]
    async fn test_single_request_passes_through() {
        let orch = ChainOfThoughtOrchestrator::new();
        let out = orch.process_request(req("hello there", "s", 4096)).await.unwrap();
        assert_eq!(out.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_requests_accumulate_in_order() {
        let orch = ChainOfThoughtOrchestrator::new();
        orch.process_request(req("one", "s", 4096)).await.unwrap();
        orch.process_request(req("two", "s", 4096)).await.unwrap();
        let out = orch.process_request(req("three", "s", 4096)).await.unwrap();
        let contents: Vec<&str> = out.messages().iter().map(Message::content).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);

        let other = orch.process_request(req("alone", "t", 4096)).await.unwrap();
        assert_eq!(other.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_from_front() {
        let orch = ChainOfThoughtOrchestrator::new();
        orch.process_request(req(&words(4), "s", 10)).await.unwrap();
        orch.process_request(req(&words(3), "s", 10)).await.unwrap();
        let out = orch.process_request(req(&words(5), "s", 10)).await.unwrap();
        let counts: Vec<usize> = out.messages().iter().map(Message::word_count).collect();
        assert_eq!(counts, vec![3, 5]);
        assert_eq!(orch.session_requests("s").await.len(), 2);
    }

    #[tokio::test]
    async fn test_current_request_survives_tiny_budget() {
        let orch = ChainOfThoughtOrchestrator::new();
        orch.process_request(req(&words(3), "s", 1)).await.unwrap();
        let out = orch.process_request(req(&words(3), "s", 1)).await.unwrap();
        assert_eq!(out.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_persist_and_clear() {
        let store = Arc::new(MemoryContextStore::new());
        let orch = ChainOfThoughtOrchestrator::with_store(store.clone());
        orch.process_request(req("a", "s", 4096)).await.unwrap();
        orch.process_request(req("b", "s", 4096)).await.unwrap();
        let saved = store.get("context:s").await.unwrap().unwrap();
        let saved: Vec<Value> = serde_json::from_str(&saved).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0]["messages"][0]["content"], "a");

        orch.clear_context("s").await.unwrap();
        assert!(store.get("context:s").await.unwrap().is_none());
        assert!(orch.session_requests("s").await.is_empty());
    }

    #[test]
    fn test_add_step_validation() {
        let mut orch = ChainOfThoughtOrchestrator::new();
        assert!(matches!(
            orch.add_step(json!({"invalid": "step"})),
            Err(Error::InvalidStepConfig(_))
        ));
        assert!(orch.add_step(json!({"name": "x", "prompt": null})).is_err());
        assert!(orch.add_step(json!({"name": "x", "prompt": "  "})).is_err());
        assert!(orch.add_step(json!({"prompt": "no name"})).is_err());
        orch.add_step(json!({"name": "analyze", "prompt": "Analyze the data"}))
            .unwrap();
        assert_eq!(orch.steps()[0].name, "analyze");
    }

    #[tokio::test]
    async fn test_solve_with_context_and_memory() {
        let mut orch = ChainOfThoughtOrchestrator::new();
        let mut ctx = HashMap::new();
        ctx.insert("data".to_string(), json!("test data"));
        orch.set_context(ctx);
        orch.add_step(json!({"name": "step1", "prompt": "Analyze {data}"}))
            .unwrap();
        orch.add_step(json!({"name": "step2", "prompt": "Use previous analysis: {step1_response}"}))
            .unwrap();
        orch.add_step(json!({"name": "step3", "prompt": "Keep {unknown} as is"}))
            .unwrap();

        let results = orch.solve(&Echo).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].prompt, "Analyze test data");
        assert_eq!(
            results[1].prompt,
            "Use previous analysis: Processed: Analyze test data"
        );
        assert_eq!(results[2].prompt, "Keep {unknown} as is");
    }

    #[tokio::test]
    async fn test_parallel_steps_run_in_order() {
        let mut orch = ChainOfThoughtOrchestrator::new();
        orch.add_parallel_steps(vec![
            PlanStep::new("step1", "Analysis 1"),
            PlanStep::new("step2", "Analysis 2"),
        ]);
        let results = orch.solve(&Echo).await.unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["step1", "step2"]);
        assert!(results.iter().all(|r| r.text().contains("Processed")));
    }
}
