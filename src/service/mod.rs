//! Multi-workflow hosting: templates, the workflow registry and its command surface

pub mod commands;
pub mod manager;
pub mod template;

pub use commands::{Command, CommandResponse, WorkflowService};
pub use manager::WorkflowManager;
pub use template::WorkflowTemplate;
