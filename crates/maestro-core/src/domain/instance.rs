use crate::types::{duration_secs, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Instance created, not yet scheduled
    Created,

    /// Waves are being dispatched
    Running,

    /// Every step reached a terminal result and no required step failed
    Completed,

    /// The run aborted (dependency failure, deadlock, handler config error,
    /// or a required step exhausting its retries)
    Failed,

    /// Saga unwind in progress after an abort
    Compensating,

    /// The overall deadline expired mid-run
    TimedOut,
}

impl WorkflowStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::TimedOut
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Compensating => "compensating",
            WorkflowStatus::TimedOut => "timed_out",
        };
        f.write_str(label)
    }
}

/// Terminal (or in-flight) status of one step within an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet dispatched
    Pending,

    /// Handler invocation in flight
    Running,

    /// Handler returned successfully
    Completed,

    /// Retries exhausted
    Failed,

    /// Not run: condition false, handler missing on an optional step, or
    /// an upstream dependency failed on an optional step
    Skipped,

    /// Originally completed, then unwound by a compensation pass
    Compensated,
}

impl StepStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StepStatus::Pending | StepStatus::Running)
    }
}

/// The recorded outcome of one step execution.
///
/// Appended exactly once per step per instance; only a later compensation
/// pass may flip a `completed` result to `compensated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name
    pub step: String,

    /// Terminal status of the step
    pub status: StepStatus,

    /// Output map returned by the handler, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Last error observed, for failed steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock time spent across all attempts
    #[serde(with = "duration_secs")]
    pub duration: Duration,

    /// Retries consumed (0 when the first attempt succeeded)
    pub retries: u32,

    /// When the step was dispatched
    pub started_at: DateTime<Utc>,

    /// When the step reached its terminal status
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    /// Record a successful execution
    pub fn completed(
        step: &str,
        output: Context,
        duration: Duration,
        retries: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Completed,
            output: Some(Value::Object(output)),
            error: None,
            duration,
            retries,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Record an execution that exhausted its retries
    pub fn failed(
        step: &str,
        error: String,
        duration: Duration,
        retries: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            duration,
            retries,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Record a step that never ran
    pub fn skipped(step: &str) -> Self {
        let now = Utc::now();
        Self {
            step: step.to_string(),
            status: StepStatus::Skipped,
            output: None,
            error: None,
            duration: Duration::ZERO,
            retries: 0,
            started_at: now,
            completed_at: now,
        }
    }
}

/// Aggregate: one execution of a workflow definition.
///
/// Exclusively owned by the task driving the run until it reaches a
/// terminal status, after which it becomes an immutable snapshot in
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance id
    pub id: String,

    /// Name of the definition this instance executes
    pub workflow: String,

    /// Version of the definition at execution time
    pub version: String,

    /// Current status
    pub status: WorkflowStatus,

    /// Execution context snapshot (input plus merged step outputs)
    pub context: Context,

    /// Step results in actual completion order, not declaration order
    pub results: Vec<StepResult>,

    /// Correlation id threaded through the run for cross-system tracing
    pub correlation_id: String,

    /// Human-readable error for failed or timed-out runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Name of a currently executing step, while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// When the instance reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    /// Create a new instance for a definition
    pub fn new(
        workflow: &str,
        version: &str,
        input: Context,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow: workflow.to_string(),
            version: version.to_string(),
            status: WorkflowStatus::Created,
            context: input,
            results: Vec::new(),
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            error: None,
            current_step: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Transition to running
    pub fn start(&mut self) {
        self.status = WorkflowStatus::Running;
    }

    /// Transition to the compensating state during a saga unwind
    pub fn begin_compensation(&mut self) {
        self.status = WorkflowStatus::Compensating;
    }

    /// Finalize as completed
    pub fn complete(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.current_step = None;
        self.completed_at = Some(Utc::now());
    }

    /// Finalize as failed
    pub fn fail(&mut self, error: String) {
        self.status = WorkflowStatus::Failed;
        self.error = Some(error);
        self.current_step = None;
        self.completed_at = Some(Utc::now());
    }

    /// Finalize as timed out
    pub fn time_out(&mut self, error: String) {
        self.status = WorkflowStatus::TimedOut;
        self.error = Some(error);
        self.current_step = None;
        self.completed_at = Some(Utc::now());
    }

    /// Look up the result recorded for a step
    pub fn result(&self, step: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step == step)
    }

    /// Total wall-clock duration, once terminal
    pub fn duration(&self) -> Option<Duration> {
        self.completed_at
            .map(|done| (done - self.created_at).to_std().unwrap_or(Duration::ZERO))
    }
}
