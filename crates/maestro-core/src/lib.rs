//!
//! Maestro Core - workflow orchestration engine
//!
//! A DAG-based executor for multi-step processes with per-step
//! timeout/retry and saga-style compensation on failure. Business logic
//! stays outside the engine: steps reference handlers by name, and the
//! engine invokes whatever is registered under that name.
//!
//! The engine schedules steps in waves: at each iteration every step whose
//! dependencies are satisfied is dispatched concurrently, and the wave
//! fully resolves before the next one starts. When a run aborts, already
//! completed steps that declare a compensating handler are unwound in
//! reverse declared order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;

/// Domain layer - definitions, conditions, and instances
pub mod domain;

/// Application services - executor, scheduler, compensation, engine
pub mod application;

/// Core types: execution context and serde helpers
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use application::engine::{ActiveWorkflow, WorkflowEngine};
pub use application::history::{Dashboard, HistoryStore, WorkflowStats, DEFAULT_HISTORY_CAPACITY};
pub use domain::condition::{ConditionEvaluator, DefaultConditionEvaluator, StepCondition};
pub use domain::definition::{WorkflowDefinition, WorkflowStep, WorkflowSummary};
pub use domain::instance::{StepResult, StepStatus, WorkflowInstance, WorkflowStatus};
pub use error::EngineError;
pub use types::{Context, SharedContext};

/// A unit of business logic invocable by the engine.
///
/// Handlers receive a snapshot of the instance's execution context and
/// return the keys to merge back into it. Steps running in the same wave
/// execute concurrently against one context; definitions must author
/// concurrent steps to write disjoint keys.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Execute the handler against the current context
    async fn run(&self, context: Context) -> Result<Context, EngineError>;
}

/// Boxed future returned by closure-backed handlers
type HandlerFuture = futures::future::BoxFuture<'static, Result<Context, EngineError>>;

/// Adapter turning an async closure into a [`StepHandler`]
struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(Context) -> HandlerFuture + Send + Sync,
{
    async fn run(&self, context: Context) -> Result<Context, EngineError> {
        (self.f)(context).await
    }
}

/// Name-keyed table of step handlers.
///
/// Owned by a [`WorkflowEngine`] instance rather than living as a
/// process-wide singleton, so multiple engines can coexist in tests.
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register (or replace) a handler under a name
    pub fn register(&self, name: &str, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Register an async closure as a handler
    pub fn register_fn<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, EngineError>> + Send + 'static,
    {
        let f = move |context: Context| -> HandlerFuture { Box::pin(f(context)) };
        self.register(name, Arc::new(FnHandler { f }));
    }

    /// Look up a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).map(|entry| entry.value().clone())
    }

    /// Whether a handler is registered under a name
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Names of all registered handlers
    pub fn names(&self) -> Vec<String> {
        self.handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
