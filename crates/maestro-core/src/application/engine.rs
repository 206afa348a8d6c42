use crate::application::compensation::CompensationManager;
use crate::application::history::{Dashboard, EngineMetrics, HistoryStore, DEFAULT_HISTORY_CAPACITY};
use crate::application::scheduler::WaveScheduler;
use crate::application::step_executor::StepExecutor;
use crate::domain::condition::{ConditionEvaluator, DefaultConditionEvaluator};
use crate::domain::definition::{WorkflowDefinition, WorkflowSummary};
use crate::domain::instance::{WorkflowInstance, WorkflowStatus};
use crate::types::{Context, SharedContext};
use crate::{EngineError, HandlerRegistry, StepHandler};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Snapshot of an instance currently mid-execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWorkflow {
    /// Instance id
    pub id: String,

    /// Definition name
    pub workflow: String,

    /// Correlation id for the run
    pub correlation_id: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// Most recently dispatched step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

/// The public façade of the orchestration engine.
///
/// Owns the definition table, the handler registry, the table of running
/// instances, bounded history, and aggregate metrics. All tables live on
/// the engine instance so multiple engines can coexist in one process.
///
/// `execute()` reports every business-level failure inside the returned
/// [`WorkflowInstance`]; the only error it raises is
/// [`EngineError::DefinitionNotFound`], before execution starts.
pub struct WorkflowEngine {
    definitions: DashMap<String, Arc<WorkflowDefinition>>,
    handlers: Arc<HandlerRegistry>,
    conditions: Arc<dyn ConditionEvaluator>,
    active: Arc<DashMap<String, ActiveWorkflow>>,
    history: HistoryStore,
    metrics: Mutex<EngineMetrics>,
}

impl WorkflowEngine {
    /// Create an engine with in-memory history
    pub fn new() -> Self {
        Self {
            definitions: DashMap::new(),
            handlers: Arc::new(HandlerRegistry::new()),
            conditions: Arc::new(DefaultConditionEvaluator),
            active: Arc::new(DashMap::new()),
            history: HistoryStore::in_memory(DEFAULT_HISTORY_CAPACITY),
            metrics: Mutex::new(EngineMetrics::default()),
        }
    }

    /// Create an engine whose history is mirrored to a JSON file, seeded
    /// from that file when it exists
    pub async fn with_history_file(path: impl AsRef<Path>) -> Self {
        let mut engine = Self::new();
        engine.history =
            HistoryStore::with_file(path.as_ref().to_path_buf(), DEFAULT_HISTORY_CAPACITY).await;
        engine
    }

    /// Replace the condition evaluator
    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = evaluator;
        self
    }

    /// Register (or replace) a step handler
    pub fn register_handler(&self, name: &str, handler: Arc<dyn StepHandler>) {
        self.handlers.register(name, handler);
    }

    /// Register an async closure as a step handler
    pub fn register_handler_fn<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Context, EngineError>> + Send + 'static,
    {
        self.handlers.register_fn(name, f);
    }

    /// Validate and store a definition, replacing any previous version
    /// registered under the same name
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<(), EngineError> {
        definition.validate()?;
        info!(
            workflow = %definition.name,
            version = %definition.version,
            steps = definition.steps.len(),
            "Workflow registered"
        );
        self.definitions
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Look up a registered definition by name
    pub fn get_workflow(&self, name: &str) -> Result<Arc<WorkflowDefinition>, EngineError> {
        self.definitions
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::DefinitionNotFound(name.to_string()))
    }

    /// Summaries of all registered definitions, sorted by name
    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .definitions
            .iter()
            .map(|entry| WorkflowSummary::from(entry.value().as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Execute a registered workflow to a terminal instance.
    ///
    /// The run is bounded by the definition's overall timeout; expiry
    /// cancels the in-flight wave and finalizes the instance as
    /// `timed_out`. Any abort (dependency failure, deadlock, handler
    /// configuration error, required-step failure, timeout) triggers the
    /// saga unwind before the instance is finalized and returned.
    pub async fn execute(
        &self,
        name: &str,
        input: Context,
        correlation_id: Option<String>,
    ) -> Result<WorkflowInstance, EngineError> {
        let definition = self.get_workflow(name)?;

        let mut instance =
            WorkflowInstance::new(&definition.name, &definition.version, input.clone(), correlation_id);
        instance.start();

        info!(
            workflow = %definition.name,
            instance = %instance.id,
            correlation = %instance.correlation_id,
            "Workflow execution started"
        );

        self.active.insert(
            instance.id.clone(),
            ActiveWorkflow {
                id: instance.id.clone(),
                workflow: definition.name.clone(),
                correlation_id: instance.correlation_id.clone(),
                started_at: instance.created_at,
                current_step: None,
            },
        );

        let context = SharedContext::new(input);
        let results = Mutex::new(Vec::new());
        let scheduler = WaveScheduler::new(StepExecutor::new(
            self.handlers.clone(),
            self.conditions.clone(),
        ));

        let active = self.active.clone();
        let instance_id = instance.id.clone();
        let on_dispatch = move |step: &str| {
            if let Some(mut entry) = active.get_mut(&instance_id) {
                entry.current_step = Some(step.to_string());
            }
        };

        let outcome = tokio::time::timeout(
            definition.timeout,
            scheduler.run(&definition, &context, &results, &on_dispatch),
        )
        .await;

        let mut results = results.into_inner();

        let abort = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some((WorkflowStatus::Failed, error.to_string())),
            Err(_) => Some((
                WorkflowStatus::TimedOut,
                EngineError::WorkflowTimeout(format!(
                    "workflow '{}' exceeded its {:.1}s deadline",
                    definition.name,
                    definition.timeout.as_secs_f64()
                ))
                .to_string(),
            )),
        };

        match abort {
            None => {
                instance.complete();
                info!(
                    workflow = %definition.name,
                    instance = %instance.id,
                    steps = results.len(),
                    "Workflow completed"
                );
            }
            Some((status, error)) => {
                warn!(
                    workflow = %definition.name,
                    instance = %instance.id,
                    error = %error,
                    "Workflow aborted, compensating completed steps"
                );
                instance.begin_compensation();
                let compensated = CompensationManager::new(self.handlers.clone())
                    .unwind(&definition, &context, &mut results)
                    .await;
                if compensated > 0 {
                    info!(
                        workflow = %definition.name,
                        instance = %instance.id,
                        compensated,
                        "Compensation finished"
                    );
                }
                match status {
                    WorkflowStatus::TimedOut => instance.time_out(error),
                    _ => instance.fail(error),
                }
            }
        }

        instance.context = context.snapshot().await;
        instance.results = results;

        self.active.remove(&instance.id);
        self.metrics.lock().await.record(&instance);
        self.history.append(instance.clone()).await;

        Ok(instance)
    }

    /// Instances currently mid-execution
    pub fn get_active_workflows(&self) -> Vec<ActiveWorkflow> {
        let mut active: Vec<ActiveWorkflow> = self
            .active
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        active.sort_by_key(|a| a.started_at);
        active
    }

    /// Filtered view over finished instances, most recent first
    pub async fn get_history(
        &self,
        workflow: Option<&str>,
        status: Option<WorkflowStatus>,
        limit: usize,
    ) -> Vec<WorkflowInstance> {
        self.history.query(workflow, status, limit).await
    }

    /// Aggregate execution metrics
    pub async fn get_dashboard(&self) -> Dashboard {
        self.metrics.lock().await.dashboard(self.active.len())
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::WorkflowStep;
    use serde_json::json;

    #[tokio::test]
    async fn test_execute_unknown_workflow_raises() {
        let engine = WorkflowEngine::new();
        let result = engine.execute("missing", Context::new(), None).await;

        match result {
            Err(EngineError::DefinitionNotFound(name)) => assert_eq!(name, "missing"),
            other => panic!("Expected DefinitionNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_definition() {
        let engine = WorkflowEngine::new();
        let cyclic = WorkflowDefinition::new("cyclic")
            .step(WorkflowStep::new("a", "h").after(&["b"]))
            .step(WorkflowStep::new("b", "h").after(&["a"]));

        assert!(matches!(
            engine.register_workflow(cyclic),
            Err(EngineError::ValidationError(_))
        ));
        assert!(engine.list_workflows().is_empty());
    }

    #[tokio::test]
    async fn test_register_overwrites_by_name() {
        let engine = WorkflowEngine::new();
        engine
            .register_workflow(
                WorkflowDefinition::new("wf")
                    .with_version("1.0.0")
                    .step(WorkflowStep::new("a", "h")),
            )
            .unwrap();
        engine
            .register_workflow(
                WorkflowDefinition::new("wf")
                    .with_version("2.0.0")
                    .step(WorkflowStep::new("a", "h"))
                    .step(WorkflowStep::new("b", "h").after(&["a"])),
            )
            .unwrap();

        let summaries = engine.list_workflows();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].version, "2.0.0");
        assert_eq!(summaries[0].step_count, 2);
        assert_eq!(summaries[0].steps, vec!["a", "b"]);

        assert_eq!(engine.get_workflow("wf").unwrap().version, "2.0.0");
        assert!(matches!(
            engine.get_workflow("unknown"),
            Err(EngineError::DefinitionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_populates_instance() {
        let engine = WorkflowEngine::new();
        engine.register_handler_fn("greet", |context: Context| async move {
            let name = context
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("world")
                .to_string();
            let mut output = Context::new();
            output.insert("greeting".to_string(), json!(format!("hello, {}", name)));
            Ok(output)
        });
        engine
            .register_workflow(
                WorkflowDefinition::new("greeter").step(WorkflowStep::new("greet", "greet")),
            )
            .unwrap();

        let mut input = Context::new();
        input.insert("name".to_string(), json!("ada"));

        let instance = engine
            .execute("greeter", input, Some("req-1".to_string()))
            .await
            .unwrap();

        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.correlation_id, "req-1");
        assert_eq!(instance.context["greeting"], json!("hello, ada"));
        assert_eq!(instance.results.len(), 1);
        assert!(instance.completed_at.is_some());
        assert!(instance.error.is_none());
        assert!(engine.get_active_workflows().is_empty());
    }
}
