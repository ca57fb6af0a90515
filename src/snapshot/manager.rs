//! Snapshot manager - capture and restore stage checkpoints

use crate::snapshot::{
    model::{FileBackup, RestoreResult, Snapshot, SnapshotConfig, SnapshotOptions, TableSnapshot},
    table::TableStore,
    SnapshotError,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Keeps at most one snapshot per stage id
pub struct SnapshotManager {
    config: SnapshotConfig,
    snapshots: Mutex<HashMap<String, Snapshot>>,
    tables: Option<Arc<dyn TableStore>>,
}

impl SnapshotManager {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            snapshots: Mutex::new(HashMap::new()),
            tables: None,
        }
    }

    pub fn with_table_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.tables = Some(store);
        self
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    fn snapshot_dir(&self, snapshot_id: &str) -> PathBuf {
        self.config.backup_dir.join(snapshot_id)
    }

    /// Capture the requested facets for a stage.
    ///
    /// Unreadable files and failing tables are skipped with a warning. Any
    /// previous snapshot of the same stage is replaced and its backups removed.
    pub async fn create_snapshot(
        &self,
        stage_id: &str,
        stage_name: &str,
        options: SnapshotOptions,
    ) -> Result<Snapshot, SnapshotError> {
        let previous = self.snapshots.lock().await.remove(stage_id);
        if let Some(previous) = previous {
            debug!("Replacing snapshot {} for stage {}", previous.id, stage_id);
            self.release(&previous).await;
        }

        let mut snapshot = Snapshot::new(stage_id, stage_name);
        snapshot.context = options.context;

        if !options.file_paths.is_empty() {
            snapshot.files = Some(self.backup_files(&snapshot.id, &options.file_paths).await?);
        }

        if !options.table_names.is_empty() {
            match &self.tables {
                Some(store) => {
                    let mut captured = HashMap::new();
                    for name in &options.table_names {
                        match store.read_rows(name).await {
                            Ok(rows) => {
                                let row_count = rows.len();
                                captured.insert(name.clone(), TableSnapshot { rows, row_count });
                            }
                            Err(e) => warn!("Skipping table {} in snapshot: {:#}", name, e),
                        }
                    }
                    snapshot.tables = Some(captured);
                }
                None => warn!(
                    "Stage {} requested table snapshots but no table store is configured",
                    stage_id
                ),
            }
        }

        info!("Created snapshot {} for stage {}", snapshot.id, stage_id);

        let evicted = {
            let mut snapshots = self.snapshots.lock().await;
            snapshots.insert(stage_id.to_string(), snapshot.clone());
            evict_oldest(&mut snapshots, self.config.max_snapshots.max(1))
        };
        for old in evicted {
            debug!("Evicting snapshot {}", old.id);
            self.release(&old).await;
        }

        Ok(snapshot)
    }

    async fn backup_files(
        &self,
        snapshot_id: &str,
        paths: &[PathBuf],
    ) -> Result<Vec<FileBackup>, SnapshotError> {
        let dir = self.snapshot_dir(snapshot_id);
        fs::create_dir_all(&dir).await?;

        let mut backups = Vec::new();
        for (index, original) in paths.iter().enumerate() {
            let file_name = original
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            let backup = dir.join(format!("{}_{}", index, file_name));
            match fs::copy(original, &backup).await {
                Ok(size) => backups.push(FileBackup {
                    original: original.clone(),
                    backup,
                    size,
                }),
                Err(e) => warn!("Skipping file {} in snapshot: {}", original.display(), e),
            }
        }
        Ok(backups)
    }

    /// Restore every captured facet of a stage's snapshot.
    ///
    /// A failing facet does not stop the others; failures are collected in
    /// [`RestoreResult::errors`].
    pub async fn restore_snapshot(&self, stage_id: &str) -> Result<RestoreResult, SnapshotError> {
        let snapshot = self
            .snapshots
            .lock()
            .await
            .get(stage_id)
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound(stage_id.to_string()))?;

        let mut result = RestoreResult {
            context: snapshot.context.clone(),
            ..RestoreResult::default()
        };

        if let Some(files) = &snapshot.files {
            let before = result.errors.len();
            for file in files {
                if let Err(e) = restore_file(file).await {
                    warn!("Failed to restore {}: {}", file.original.display(), e);
                    result
                        .errors
                        .push(format!("File {}: {}", file.original.display(), e));
                }
            }
            result.filesystem_restored = result.errors.len() == before;
        }

        if let Some(tables) = &snapshot.tables {
            let before = result.errors.len();
            match &self.tables {
                Some(store) => {
                    for (name, table) in tables {
                        if let Err(e) = store.replace_rows(name, &table.rows).await {
                            warn!("Failed to restore table {}: {:#}", name, e);
                            result.errors.push(format!("Table {}: {:#}", name, e));
                        }
                    }
                }
                None => result
                    .errors
                    .push("Tables captured but no table store is configured".to_string()),
            }
            result.database_restored = result.errors.len() == before;
        }

        result.success = result.errors.is_empty();
        info!(
            "Restored snapshot {} for stage {} ({} errors)",
            snapshot.id,
            stage_id,
            result.errors.len()
        );
        Ok(result)
    }

    pub async fn get_snapshot(&self, stage_id: &str) -> Option<Snapshot> {
        self.snapshots.lock().await.get(stage_id).cloned()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.lock().await.len()
    }

    /// Drop a stage's snapshot and its backups; returns whether one existed
    pub async fn delete_snapshot(&self, stage_id: &str) -> bool {
        let removed = self.snapshots.lock().await.remove(stage_id);
        match removed {
            Some(snapshot) => {
                self.release(&snapshot).await;
                true
            }
            None => false,
        }
    }

    pub async fn cleanup_all(&self) {
        let drained: Vec<Snapshot> = self.snapshots.lock().await.drain().map(|(_, s)| s).collect();
        for snapshot in drained {
            self.release(&snapshot).await;
        }
    }

    async fn release(&self, snapshot: &Snapshot) {
        if snapshot.files.is_none() {
            return;
        }
        let dir = self.snapshot_dir(&snapshot.id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove backups in {}: {}", dir.display(), e),
        }
    }
}

async fn restore_file(file: &FileBackup) -> std::io::Result<()> {
    if let Some(parent) = file.original.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::copy(&file.backup, &file.original).await?;
    Ok(())
}

/// Remove snapshots beyond `max`, oldest first
fn evict_oldest(snapshots: &mut HashMap<String, Snapshot>, max: usize) -> Vec<Snapshot> {
    let mut evicted = Vec::new();
    while snapshots.len() > max {
        let oldest = snapshots
            .iter()
            .min_by(|a, b| {
                a.1.created_at
                    .cmp(&b.1.created_at)
                    .then_with(|| a.1.id.cmp(&b.1.id))
            })
            .map(|(key, _)| key.clone());
        match oldest.and_then(|key| snapshots.remove(&key)) {
            Some(snapshot) => evicted.push(snapshot),
            None => break,
        }
    }
    evicted
}
