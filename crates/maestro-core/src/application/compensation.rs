use crate::domain::definition::WorkflowDefinition;
use crate::domain::instance::{StepResult, StepStatus};
use crate::types::SharedContext;
use crate::HandlerRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Deadline for one compensating handler invocation, independent of the
/// original step's timeout.
pub const COMPENSATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Unwinds completed steps after a workflow aborts.
///
/// Walks the definition's steps in reverse declared order and invokes the
/// compensating handler of every step that completed and declares one.
/// Compensation failures are logged and never stop the unwind.
pub struct CompensationManager {
    handlers: Arc<HandlerRegistry>,
}

impl CompensationManager {
    /// Create a compensation manager over a handler registry
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }

    /// Run the unwind, flipping each compensated result's status.
    ///
    /// Returns the number of steps successfully compensated.
    pub async fn unwind(
        &self,
        definition: &WorkflowDefinition,
        context: &SharedContext,
        results: &mut [StepResult],
    ) -> usize {
        let mut compensated = 0;

        for step in definition.steps.iter().rev() {
            let Some(handler_name) = &step.compensate else {
                continue;
            };
            let Some(result) = results
                .iter_mut()
                .find(|r| r.step == step.name && r.status == StepStatus::Completed)
            else {
                continue;
            };
            let Some(handler) = self.handlers.get(handler_name) else {
                warn!(
                    workflow = %definition.name,
                    step = %step.name,
                    handler = %handler_name,
                    "No compensating handler registered, continuing unwind"
                );
                continue;
            };

            let snapshot = context.snapshot().await;
            match tokio::time::timeout(COMPENSATION_TIMEOUT, handler.run(snapshot)).await {
                Ok(Ok(output)) => {
                    context.merge(output).await;
                    result.status = StepStatus::Compensated;
                    compensated += 1;
                    info!(
                        workflow = %definition.name,
                        step = %step.name,
                        handler = %handler_name,
                        "Step compensated"
                    );
                }
                Ok(Err(error)) => {
                    warn!(
                        workflow = %definition.name,
                        step = %step.name,
                        error = %error,
                        "Compensation handler failed, continuing unwind"
                    );
                }
                Err(_) => {
                    warn!(
                        workflow = %definition.name,
                        step = %step.name,
                        "Compensation handler timed out, continuing unwind"
                    );
                }
            }
        }

        compensated
    }
}
