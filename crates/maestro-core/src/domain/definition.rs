use crate::domain::condition::StepCondition;
use crate::types::duration_secs;
use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_required() -> bool {
    true
}

fn default_workflow_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// One step of a workflow definition.
///
/// Immutable once the definition is registered; many concurrent instances
/// may reference the same step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step name, unique within the definition
    pub name: String,

    /// Name of the handler to invoke, resolved through the engine's
    /// handler registry at execution time
    pub handler: String,

    /// Deadline for a single handler attempt
    #[serde(default = "default_step_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Number of retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between attempts; attempt `a` sleeps `retry_delay * (a + 1)`
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub retry_delay: Duration,

    /// Whether this step's failure (or missing handler) is allowed to
    /// abort the workflow
    #[serde(default = "default_required")]
    pub required: bool,

    /// Names of steps that must reach a terminal result before this one runs
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Optional runtime gate evaluated against the context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,

    /// Optional compensating handler invoked during saga unwind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensate: Option<String>,
}

impl WorkflowStep {
    /// Create a step with default timeout and retry policy
    pub fn new(name: &str, handler: &str) -> Self {
        Self {
            name: name.to_string(),
            handler: handler.to_string(),
            timeout: default_step_timeout(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            required: default_required(),
            depends_on: Vec::new(),
            condition: None,
            compensate: None,
        }
    }

    /// Set the per-attempt timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count and base delay
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Mark the step as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Declare upstream dependencies
    pub fn after(mut self, dependencies: &[&str]) -> Self {
        self.depends_on = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Gate the step on a runtime condition
    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Declare a compensating handler
    pub fn compensate_with(mut self, handler: &str) -> Self {
        self.compensate = Some(handler.to_string());
        self
    }
}

/// A parsed and validated workflow definition: a DAG of named steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name, the key under which the definition is registered
    pub name: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Definition version string
    #[serde(default = "default_version")]
    pub version: String,

    /// The steps in declared order
    pub steps: Vec<WorkflowStep>,

    /// Deadline for the whole run, covering every wave
    #[serde(default = "default_workflow_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

impl WorkflowDefinition {
    /// Create an empty definition with the default overall timeout
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            version: default_version(),
            steps: Vec::new(),
            timeout: default_workflow_timeout(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Set the version string
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Set the overall timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append a step
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Parse a definition from its JSON authoring form
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Names of all steps in declared order
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    /// Validate the definition
    ///
    /// Rejects empty step lists, duplicate step names, dependencies on
    /// unknown steps, and dependency cycles. Runs at registration time so
    /// an unsatisfiable graph never reaches the scheduler.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.steps.is_empty() {
            return Err(EngineError::ValidationError(
                "Workflow must have at least one step".to_string(),
            ));
        }

        let mut step_names = std::collections::HashSet::new();
        for step in &self.steps {
            if !step_names.insert(step.name.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate step name: {}",
                    step.name
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !step_names.contains(dep.as_str()) {
                    return Err(EngineError::ValidationError(format!(
                        "Step {} depends on unknown step: {}",
                        step.name, dep
                    )));
                }
            }
        }

        self.check_for_cycles()
    }

    /// Check for cycles in the step dependency graph
    fn check_for_cycles(&self) -> Result<(), EngineError> {
        let mut visited = std::collections::HashSet::new();
        let mut rec_stack = std::collections::HashSet::new();

        let mut dep_map = std::collections::HashMap::new();
        for step in &self.steps {
            dep_map.insert(step.name.as_str(), &step.depends_on);
        }

        for step in &self.steps {
            if self.is_cyclic(step.name.as_str(), &dep_map, &mut visited, &mut rec_stack) {
                return Err(EngineError::ValidationError(format!(
                    "Cycle detected in step dependencies involving step: {}",
                    step.name
                )));
            }
        }

        Ok(())
    }

    /// DFS cycle check over the dependency map
    fn is_cyclic<'a>(
        &self,
        step_name: &'a str,
        dep_map: &std::collections::HashMap<&'a str, &'a Vec<String>>,
        visited: &mut std::collections::HashSet<&'a str>,
        rec_stack: &mut std::collections::HashSet<&'a str>,
    ) -> bool {
        if !visited.contains(step_name) {
            visited.insert(step_name);
            rec_stack.insert(step_name);

            if let Some(deps) = dep_map.get(step_name) {
                for dep in *deps {
                    let dep_str = dep.as_str();
                    if (!visited.contains(dep_str)
                        && self.is_cyclic(dep_str, dep_map, visited, rec_stack))
                        || rec_stack.contains(dep_str)
                    {
                        return true;
                    }
                }
            }
        }

        rec_stack.remove(step_name);
        false
    }
}

/// Summary of a registered workflow, as returned by `list_workflows`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow name
    pub name: String,

    /// Definition version string
    pub version: String,

    /// Number of steps
    pub step_count: usize,

    /// Overall timeout
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// Step names in declared order
    pub steps: Vec<String>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            version: definition.version.clone(),
            step_count: definition.steps.len(),
            timeout: definition.timeout,
            steps: definition.step_names(),
        }
    }
}
