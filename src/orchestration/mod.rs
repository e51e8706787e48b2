//! 编排模块：会话上下文链接与分步求解。
//!
//! Session context chaining and plan/solve prompting on top of the client.

pub mod chain_of_thought;
pub mod store;

pub use chain_of_thought::{
    ChainOfThoughtOrchestrator, CompletionBackend, PlanStep, StepOutcome, DEFAULT_SESSION,
    DEFAULT_TOKEN_BUDGET,
};
pub use store::{ContextStore, MemoryContextStore, NullContextStore};
