//! Scenario-based tests for workflow-pipeline

mod helpers;

mod gate_failure;
mod override_and_retry;
mod pause_and_cancel;
mod progress;
mod retry_resumption;
mod service_commands;
mod snapshot_restore;
