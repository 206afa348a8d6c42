use crate::{types::Context, EngineError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declarative predicate over the execution context.
///
/// Conditions gate whether a step runs at all; a step whose condition
/// evaluates false is recorded as `skipped` without consuming any retry
/// attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    /// The context contains `key`
    Exists {
        /// Context key to probe
        key: String,
    },

    /// The context value at `key` is truthy (non-null, non-zero, non-empty)
    Truthy {
        /// Context key to probe
        key: String,
    },

    /// The context value at `key` equals `value`
    Equals {
        /// Context key to probe
        key: String,
        /// Expected value
        value: Value,
    },
}

/// Evaluates a step's condition to determine if it should run
pub trait ConditionEvaluator: Send + Sync {
    /// Evaluate the condition against the current execution context
    fn evaluate(&self, condition: &StepCondition, context: &Context) -> Result<bool, EngineError>;
}

/// Default condition evaluator covering the built-in predicates
pub struct DefaultConditionEvaluator;

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn evaluate(&self, condition: &StepCondition, context: &Context) -> Result<bool, EngineError> {
        match condition {
            StepCondition::Exists { key } => Ok(context.contains_key(key)),
            StepCondition::Truthy { key } => Ok(context.get(key).map(is_truthy).unwrap_or(false)),
            StepCondition::Equals { key, value } => Ok(context.get(key) == Some(value)),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
