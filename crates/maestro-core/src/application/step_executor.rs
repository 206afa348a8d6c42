use crate::domain::condition::ConditionEvaluator;
use crate::domain::definition::WorkflowStep;
use crate::domain::instance::StepResult;
use crate::types::SharedContext;
use crate::{EngineError, HandlerRegistry};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Executes exactly one step against the shared context with bounded
/// blocking and controlled retry.
pub struct StepExecutor {
    handlers: Arc<HandlerRegistry>,
    conditions: Arc<dyn ConditionEvaluator>,
}

impl StepExecutor {
    /// Create an executor over a handler registry and condition evaluator
    pub fn new(handlers: Arc<HandlerRegistry>, conditions: Arc<dyn ConditionEvaluator>) -> Self {
        Self {
            handlers,
            conditions,
        }
    }

    /// Run one step to a terminal [`StepResult`].
    ///
    /// A false condition or a missing handler on an optional step resolves
    /// to `skipped` without consuming attempts. A missing handler on a
    /// required step is a fatal configuration error. Deadline expiry on an
    /// attempt is treated identically to a handler error; attempt `a`
    /// sleeps `retry_delay * (a + 1)` before the next try.
    pub async fn execute(
        &self,
        workflow: &str,
        step: &WorkflowStep,
        context: &SharedContext,
    ) -> Result<StepResult, EngineError> {
        let started_at = Utc::now();

        if let Some(condition) = &step.condition {
            let snapshot = context.snapshot().await;
            match self.conditions.evaluate(condition, &snapshot) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(
                        workflow = %workflow,
                        step = %step.name,
                        "Skipping step, condition not met"
                    );
                    return Ok(StepResult::skipped(&step.name));
                }
                Err(error) => {
                    warn!(
                        workflow = %workflow,
                        step = %step.name,
                        error = %error,
                        "Condition evaluation failed"
                    );
                    return Ok(StepResult::failed(
                        &step.name,
                        error.to_string(),
                        std::time::Duration::ZERO,
                        0,
                        started_at,
                    ));
                }
            }
        }

        let handler = match self.handlers.get(&step.handler) {
            Some(handler) => handler,
            None if step.required => {
                return Err(EngineError::HandlerMissing {
                    step: step.name.clone(),
                    handler: step.handler.clone(),
                });
            }
            None => {
                debug!(
                    workflow = %workflow,
                    step = %step.name,
                    handler = %step.handler,
                    "Skipping optional step, no handler registered"
                );
                return Ok(StepResult::skipped(&step.name));
            }
        };

        let clock = Instant::now();
        let mut last_error = String::new();

        for attempt in 0..=step.max_retries {
            let snapshot = context.snapshot().await;

            match tokio::time::timeout(step.timeout, handler.run(snapshot)).await {
                Ok(Ok(output)) => {
                    debug!(
                        workflow = %workflow,
                        step = %step.name,
                        retries = attempt,
                        outputs = output.len(),
                        "Step completed"
                    );
                    context.merge(output.clone()).await;
                    return Ok(StepResult::completed(
                        &step.name,
                        output,
                        clock.elapsed(),
                        attempt,
                        started_at,
                    ));
                }
                Ok(Err(error)) => {
                    last_error = error.to_string();
                }
                Err(_) => {
                    last_error = format!(
                        "step '{}' timed out after {:.1}s",
                        step.name,
                        step.timeout.as_secs_f64()
                    );
                }
            }

            if attempt < step.max_retries {
                let delay = step.retry_delay * (attempt + 1);
                warn!(
                    workflow = %workflow,
                    step = %step.name,
                    attempt = attempt + 1,
                    max_attempts = step.max_retries + 1,
                    error = %last_error,
                    "Step attempt failed, retrying after {:.1}s",
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }

        warn!(
            workflow = %workflow,
            step = %step.name,
            retries = step.max_retries,
            error = %last_error,
            "Step failed, retries exhausted"
        );
        Ok(StepResult::failed(
            &step.name,
            last_error,
            clock.elapsed(),
            step.max_retries,
            started_at,
        ))
    }
}
