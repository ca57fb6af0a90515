//! Execution state models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// Workflow has not started
    Idle,
    /// Workflow is currently running
    Running,
    /// Workflow is paused at a stage boundary
    Paused,
    /// Workflow completed successfully
    Completed,
    /// Workflow failed (may be retried)
    Failed,
    /// Workflow was cancelled
    Cancelled,
}

impl WorkflowState {
    /// All states, in declaration order
    pub const ALL: [WorkflowState; 6] = [
        WorkflowState::Idle,
        WorkflowState::Running,
        WorkflowState::Paused,
        WorkflowState::Completed,
        WorkflowState::Failed,
        WorkflowState::Cancelled,
    ];

    /// States reachable from this one in a single transition
    pub fn allowed_transitions(self) -> &'static [WorkflowState] {
        use WorkflowState::*;
        match self {
            Idle => &[Running, Cancelled],
            Running => &[Paused, Completed, Failed, Cancelled],
            Paused => &[Running, Cancelled],
            Completed => &[],
            Failed => &[Running],
            Cancelled => &[],
        }
    }

    /// Check if the state has no outgoing transitions
    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Check if the workflow is in flight (running or paused)
    pub fn is_active(self) -> bool {
        matches!(self, WorkflowState::Running | WorkflowState::Paused)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Running => "running",
            WorkflowState::Paused => "paused",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Status of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    /// A stage in one of these states counts fully towards weighted progress
    pub fn is_done(self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Status of a single step inside a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Status of a quality gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pending,
    Checking,
    Passed,
    Failed,
    /// Overridden by an operator
    Skipped,
}
