//! Domain layer: workflow definitions, runtime conditions, and the
//! per-execution instance aggregate.

/// Runtime conditions gating step execution
pub mod condition;

/// Workflow and step definitions
pub mod definition;

/// Workflow instances and step results
pub mod instance;
