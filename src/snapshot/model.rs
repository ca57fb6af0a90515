//! Snapshot data model

use crate::core::context::ContextData;
use crate::snapshot::table::Row;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Settings for the snapshot manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshots kept before the oldest are evicted
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// Root directory for file backups
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

fn default_max_snapshots() -> usize {
    10
}

fn default_backup_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("workflow")
        .join("snapshots")
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshots: default_max_snapshots(),
            backup_dir: default_backup_dir(),
        }
    }
}

/// A file copied aside before a stage ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileBackup {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub size: u64,
}

/// Full row copy of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub rows: Vec<Row>,
    pub row_count: usize,
}

/// State captured before a stage executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `{stage_id}-{unix_millis}`
    pub id: String,
    pub stage_id: String,
    pub stage_name: String,
    pub created_at: DateTime<Utc>,
    pub context: Option<ContextData>,
    pub files: Option<Vec<FileBackup>>,
    pub tables: Option<HashMap<String, TableSnapshot>>,
}

impl Snapshot {
    pub(crate) fn new(stage_id: &str, stage_name: &str) -> Self {
        let created_at = Utc::now();
        Self {
            id: format!("{}-{}", stage_id, created_at.timestamp_millis()),
            stage_id: stage_id.to_string(),
            stage_name: stage_name.to_string(),
            created_at,
            context: None,
            files: None,
            tables: None,
        }
    }
}

/// Which facets to capture
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub context: Option<ContextData>,
    pub file_paths: Vec<PathBuf>,
    pub table_names: Vec<String>,
}

impl SnapshotOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: ContextData) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_paths.push(path.into());
        self
    }

    pub fn with_table(mut self, name: impl Into<String>) -> Self {
        self.table_names.push(name.into());
        self
    }
}

/// Outcome of restoring a snapshot. Facets restore independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreResult {
    /// True when no facet reported an error
    pub success: bool,
    pub context: Option<ContextData>,
    pub filesystem_restored: bool,
    pub database_restored: bool,
    pub errors: Vec<String>,
}
