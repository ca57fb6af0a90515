//! Stage checkpoints: context, file and table snapshots with rollback

pub mod manager;
pub mod model;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod table;

pub use manager::SnapshotManager;
pub use model::{FileBackup, RestoreResult, Snapshot, SnapshotConfig, SnapshotOptions, TableSnapshot};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTableStore;
pub use table::{InMemoryTableStore, Row, TableStore};

use thiserror::Error;

/// Error types for snapshot operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("No snapshot for stage: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
