//! Checkpoint/rollback wrapper around stage execution

use crate::core::{context::WorkflowContext, stage::Stage};
use crate::snapshot::{RestoreResult, Snapshot, SnapshotError, SnapshotManager, SnapshotOptions};

/// Snapshot operations for one stage, driven by its checkpoint policy
pub struct Checkpoint<'a> {
    snapshots: &'a SnapshotManager,
    stage: &'a Stage,
}

impl<'a> Checkpoint<'a> {
    pub fn new(snapshots: &'a SnapshotManager, stage: &'a Stage) -> Self {
        Self { snapshots, stage }
    }

    /// Capture state before the stage executes
    pub async fn capture(&self, context: &WorkflowContext) -> Result<Snapshot, SnapshotError> {
        let policy = &self.stage.checkpoint;
        let options = SnapshotOptions {
            context: policy.capture_context.then(|| context.snapshot()),
            file_paths: policy.files.clone(),
            table_names: policy.tables.clone(),
        };
        self.snapshots
            .create_snapshot(&self.stage.id, &self.stage.name, options)
            .await
    }

    /// Restore the stage's snapshot and merge any captured context back
    /// into the running context
    pub async fn rollback(&self, context: &WorkflowContext) -> Result<RestoreResult, SnapshotError> {
        let mut result = self.snapshots.restore_snapshot(&self.stage.id).await?;
        if let Some(restored) = result.context.take() {
            context.merge(restored.clone());
            result.context = Some(restored);
        }
        Ok(result)
    }

    /// Drop the snapshot once the stage is known good
    pub async fn release(&self) -> bool {
        self.snapshots.delete_snapshot(&self.stage.id).await
    }
}
