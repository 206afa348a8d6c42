use crate::application::step_executor::StepExecutor;
use crate::domain::definition::{WorkflowDefinition, WorkflowStep};
use crate::domain::instance::{StepResult, StepStatus};
use crate::types::SharedContext;
use crate::EngineError;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Drives a definition to completion in waves.
///
/// Each iteration partitions the not-yet-dispatched steps into the
/// runnable set (all dependencies resolved), the waiting set, and steps
/// resolved as skipped because an upstream dependency failed. The whole
/// runnable set executes concurrently and fully resolves before the next
/// partition.
pub struct WaveScheduler {
    executor: StepExecutor,
}

impl WaveScheduler {
    /// Create a scheduler around a step executor
    pub fn new(executor: StepExecutor) -> Self {
        Self { executor }
    }

    /// Run every step of the definition to a terminal result.
    ///
    /// Results are pushed into `results` in completion order as each wave
    /// resolves, so an abort (or a cancellation of this future by the
    /// workflow-level deadline) leaves the partial result list intact.
    /// `on_dispatch` is invoked with the step name as each step begins.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        context: &SharedContext,
        results: &Mutex<Vec<StepResult>>,
        on_dispatch: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<(), EngineError> {
        let mut remaining: Vec<&WorkflowStep> = definition.steps.iter().collect();
        let mut resolved: HashMap<String, StepStatus> = HashMap::new();

        while !remaining.is_empty() {
            let mut runnable: Vec<&WorkflowStep> = Vec::new();
            let mut waiting: Vec<&WorkflowStep> = Vec::new();

            for step in remaining {
                let failed_dep = step
                    .depends_on
                    .iter()
                    .find(|dep| resolved.get(dep.as_str()) == Some(&StepStatus::Failed));

                if let Some(dep) = failed_dep {
                    if step.required {
                        return Err(EngineError::DependencyFailure {
                            step: step.name.clone(),
                            dependency: dep.clone(),
                        });
                    }
                    debug!(
                        workflow = %definition.name,
                        step = %step.name,
                        dependency = %dep,
                        "Skipping optional step, dependency failed"
                    );
                    resolved.insert(step.name.clone(), StepStatus::Skipped);
                    results.lock().await.push(StepResult::skipped(&step.name));
                    continue;
                }

                if step
                    .depends_on
                    .iter()
                    .all(|dep| resolved.contains_key(dep.as_str()))
                {
                    runnable.push(step);
                } else {
                    waiting.push(step);
                }
            }

            if runnable.is_empty() {
                if waiting.is_empty() {
                    break;
                }
                let stuck: Vec<&str> = waiting.iter().map(|s| s.name.as_str()).collect();
                return Err(EngineError::Deadlock(format!(
                    "no runnable steps while steps remain: {}",
                    stuck.join(", ")
                )));
            }

            debug!(
                workflow = %definition.name,
                wave = ?runnable.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "Dispatching wave"
            );

            let wave = runnable.iter().map(|step| {
                let step = *step;
                async move {
                    on_dispatch(&step.name);
                    let outcome = self.executor.execute(&definition.name, step, context).await;
                    (step, outcome)
                }
            });
            let outcomes = futures::future::join_all(wave).await;

            let mut fatal: Option<EngineError> = None;
            let mut failed_required: Option<(String, String)> = None;

            for (step, outcome) in outcomes {
                match outcome {
                    Ok(result) => {
                        if step.required
                            && result.status == StepStatus::Failed
                            && failed_required.is_none()
                        {
                            failed_required = Some((
                                step.name.clone(),
                                result.error.clone().unwrap_or_default(),
                            ));
                        }
                        resolved.insert(step.name.clone(), result.status);
                        results.lock().await.push(result);
                    }
                    Err(error) => {
                        if fatal.is_none() {
                            fatal = Some(error);
                        }
                    }
                }
            }

            if let Some(error) = fatal {
                return Err(error);
            }
            if let Some((step, error)) = failed_required {
                return Err(EngineError::StepFailed { step, error });
            }

            remaining = waiting;
        }

        Ok(())
    }
}
