//! Test utility functions for workflow-pipeline

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use workflow_pipeline::core::log::LogEntry;
use workflow_pipeline::core::stage::{stage_fn, StageHandle};
use workflow_pipeline::core::{ExecutorError, Stage, StageExecutor, WorkflowContext, WorkflowEvent};
use workflow_pipeline::gates::{check_fn, CheckOutcome, QualityCheck};
use workflow_pipeline::{Pipeline, SnapshotConfig, SnapshotManager};

/// Stage whose executor returns a fixed value and counts its calls
pub fn counted_stage(id: &str, weight: f64, output: Value, calls: Arc<AtomicUsize>) -> Stage {
    Stage::new(id, id)
        .with_weight(weight)
        .with_executor(stage_fn(move |_input, _ctx| {
            let output = output.clone();
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(output)
            }
        }))
}

/// Stage returning a fixed value
pub fn fixed_stage(id: &str, weight: f64, output: Value) -> Stage {
    counted_stage(id, weight, output, Arc::new(AtomicUsize::new(0)))
}

/// Stage that fails on its first `failures` calls, then succeeds
pub fn flaky_stage(id: &str, failures: usize, calls: Arc<AtomicUsize>) -> Stage {
    Stage::new(id, id).with_executor(stage_fn(move |input, _ctx| {
        let calls = calls.clone();
        async move {
            if calls.fetch_add(1, Ordering::SeqCst) < failures {
                Err(ExecutorError::msg("simulated failure"))
            } else {
                Ok(input)
            }
        }
    }))
}

/// Check with a constant score
pub fn constant_check(name: &str, score: f64) -> Arc<dyn QualityCheck> {
    check_fn(name, move |_result, _ctx| {
        CheckOutcome::new(score >= 0.5, score, format!("constant {:.2}", score))
    })
}

/// Executor that reports a progress value, then parks until released
pub struct ParkedStage {
    pub progress: u8,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
    pub output: Value,
    pub fails: bool,
}

impl ParkedStage {
    pub fn new(progress: u8, output: Value) -> Self {
        Self {
            progress,
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            output,
            fails: false,
        }
    }

    /// Parks like `new`, then errors once released
    pub fn failing(progress: u8) -> Self {
        Self {
            fails: true,
            ..Self::new(progress, Value::Null)
        }
    }
}

#[async_trait]
impl StageExecutor for ParkedStage {
    async fn execute(
        &self,
        _input: Value,
        _context: &WorkflowContext,
        stage: &StageHandle,
    ) -> Result<Value, ExecutorError> {
        stage.report_progress(self.progress);
        self.reached.notify_one();
        self.release.notified().await;
        if self.fails {
            return Err(ExecutorError::msg("released into failure"));
        }
        Ok(self.output.clone())
    }
}

/// Snapshot manager backed by a temporary directory
pub fn temp_snapshots(dir: &tempfile::TempDir) -> Arc<SnapshotManager> {
    Arc::new(SnapshotManager::new(SnapshotConfig {
        max_snapshots: 10,
        backup_dir: dir.path().to_path_buf(),
    }))
}

/// Collect every `Progress.overall` value emitted until the workflow ends
pub fn record_progress(pipeline: &Pipeline) -> tokio::task::JoinHandle<Vec<u8>> {
    let mut events = pipeline.subscribe();
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Ok(envelope) = events.recv().await {
            match envelope.event {
                WorkflowEvent::Progress { overall, .. } => seen.push(overall),
                WorkflowEvent::WorkflowCompleted { .. } | WorkflowEvent::WorkflowError { .. } => {
                    break
                }
                _ => {}
            }
        }
        seen
    })
}

/// Assert that some log entry contains `needle`
pub fn assert_logged(logs: &[LogEntry], needle: &str) {
    assert!(
        logs.iter().any(|entry| entry.message.contains(needle)),
        "no log entry containing {:?} in {:#?}",
        needle,
        logs.iter().map(|e| &e.message).collect::<Vec<_>>()
    );
}
