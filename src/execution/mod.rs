//! Pipeline execution engine

pub mod builder;
pub mod checkpoint;
pub mod engine;
pub mod pause;
pub mod shell;

pub use builder::PipelineBuilder;
pub use checkpoint::Checkpoint;
pub use engine::{Pipeline, PipelineResult, WorkflowStatus, WorkflowSummary};
pub use pause::PauseGate;
pub use shell::ShellStep;
