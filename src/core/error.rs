//! Error types for workflow execution

use crate::core::state::WorkflowState;
use crate::gates::GateError;
use thiserror::Error;

/// Error raised by an injected stage or step executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Build a plain failure from any displayable message
    pub fn msg(message: impl std::fmt::Display) -> Self {
        ExecutorError::Failed(message.to_string())
    }
}

/// Error raised while executing a stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage '{stage_id}' has no executor and no steps")]
    MissingExecutor { stage_id: String },

    #[error("Step '{step_id}' of stage '{stage_id}' has no executor")]
    MissingStepExecutor { stage_id: String, step_id: String },

    #[error("Step '{step_id}' failed: {source}")]
    Step {
        step_id: String,
        #[source]
        source: ExecutorError,
    },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Errors surfaced by the pipeline and its control operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Cannot {action} workflow in state {state}")]
    InvalidTransition {
        action: &'static str,
        state: WorkflowState,
    },

    #[error("Cannot start workflow from state {0}")]
    CannotStart(WorkflowState),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Quality gate failed: {gate_id} (score {score:.2} < threshold {threshold:.2})")]
    GateFailed {
        gate_id: String,
        score: f64,
        threshold: f64,
    },

    #[error("Stage '{stage_id}' failed: {source}")]
    Stage {
        stage_id: String,
        #[source]
        source: StageError,
    },

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow definition: {0}")]
    Validation(String),

    #[error(transparent)]
    Gate(#[from] GateError),
}
