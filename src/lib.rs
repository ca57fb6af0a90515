//! workflow-pipeline - a staged workflow engine with quality gates and
//! checkpoint rollback

pub mod cli;
pub mod core;
pub mod execution;
pub mod gates;
pub mod service;
pub mod snapshot;

// Re-export commonly used types
pub use core::{
    EventBus, ExecutorError, Stage, StageExecutor, StageStatus, Step, StepExecutor,
    WorkflowContext, WorkflowError, WorkflowEvent, WorkflowState,
};
pub use execution::{Pipeline, PipelineBuilder, PipelineResult};
pub use gates::{QualityCheck, QualityGate, QualityGateManager};
pub use service::{Command, CommandResponse, WorkflowManager, WorkflowService, WorkflowTemplate};
pub use snapshot::{SnapshotConfig, SnapshotManager};
