use thiserror::Error;

/// Core error type for the Maestro engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Workflow definition not found
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(String),

    /// Definition failed registration-time validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No handler registered under the name a required step references
    #[error("No handler registered as '{handler}' for required step '{step}'")]
    HandlerMissing {
        /// Step that referenced the handler
        step: String,
        /// Handler name that could not be resolved
        handler: String,
    },

    /// Step handler raised an error
    #[error("Step execution error: {0}")]
    StepExecutionError(String),

    /// A required step exhausted its retries
    #[error("Required step '{step}' failed: {error}")]
    StepFailed {
        /// Step whose retries were exhausted
        step: String,
        /// Last error recorded for the step
        error: String,
    },

    /// A required step's upstream dependency failed
    #[error("Dependency '{dependency}' of required step '{step}' failed")]
    DependencyFailure {
        /// The dependent step
        step: String,
        /// The failed upstream step
        dependency: String,
    },

    /// No step can become runnable while steps remain
    #[error("Workflow deadlocked: {0}")]
    Deadlock(String),

    /// Overall workflow deadline exceeded
    #[error("Workflow timed out: {0}")]
    WorkflowTimeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    IoError(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::IoError(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::StepExecutionError(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::StepExecutionError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (
                EngineError::DefinitionNotFound("billing".to_string()),
                "Workflow definition not found: billing",
            ),
            (
                EngineError::HandlerMissing {
                    step: "charge".to_string(),
                    handler: "charge_card".to_string(),
                },
                "No handler registered as 'charge_card' for required step 'charge'",
            ),
            (
                EngineError::DependencyFailure {
                    step: "notify".to_string(),
                    dependency: "charge".to_string(),
                },
                "Dependency 'charge' of required step 'notify' failed",
            ),
            (
                EngineError::Deadlock("no runnable steps".to_string()),
                "Workflow deadlocked: no runnable steps",
            ),
        ];

        for (error, expected) in errors {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: EngineError = json_error.into();

        match error {
            EngineError::SerializationError(msg) => assert!(msg.contains("expected")),
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "history file missing");
        let error: EngineError = io_error.into();

        match error {
            EngineError::IoError(msg) => assert!(msg.contains("history file missing")),
            _ => panic!("Expected IoError variant"),
        }
    }

    #[test]
    fn test_from_str() {
        let error: EngineError = "upstream service unavailable".into();
        match error {
            EngineError::StepExecutionError(msg) => {
                assert_eq!(msg, "upstream service unavailable");
            }
            _ => panic!("Expected StepExecutionError variant"),
        }
    }
}
