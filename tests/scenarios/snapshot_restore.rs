//! Test: snapshot round-trips and independent facet restores

use serde_json::json;
use std::sync::Arc;
use workflow_pipeline::core::ContextData;
use workflow_pipeline::snapshot::{InMemoryTableStore, Row, SnapshotOptions, TableStore};
use workflow_pipeline::{SnapshotConfig, SnapshotManager};

fn row(id: i64, name: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(id));
    row.insert("name".into(), json!(name));
    row
}

fn manager(dir: &tempfile::TempDir, tables: Arc<InMemoryTableStore>) -> SnapshotManager {
    SnapshotManager::new(SnapshotConfig {
        max_snapshots: 5,
        backup_dir: dir.path().join("backups"),
    })
    .with_table_store(tables)
}

#[tokio::test]
async fn test_round_trip_restores_every_facet() {
    let dir = tempfile::tempdir().unwrap();
    let tables = Arc::new(InMemoryTableStore::new());
    tables.create_table("users", vec![row(1, "ada"), row(2, "lin")]).await;
    let snapshots = manager(&dir, tables.clone());

    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "before").unwrap();
    let mut context = ContextData::new();
    context.insert("plan".into(), json!({"steps": [1, 2, 3]}));

    snapshots
        .create_snapshot(
            "build",
            "Build",
            SnapshotOptions::new()
                .with_context(context.clone())
                .with_file(&file)
                .with_table("users"),
        )
        .await
        .unwrap();

    std::fs::write(&file, "after").unwrap();
    tables.replace_rows("users", &[row(9, "zed")]).await.unwrap();

    let mut restored = snapshots.restore_snapshot("build").await.unwrap();
    assert!(restored.success, "{:?}", restored.errors);
    assert!(restored.filesystem_restored);
    assert!(restored.database_restored);
    assert_eq!(restored.context.as_ref(), Some(&context));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "before");
    assert_eq!(
        tables.rows("users").await.unwrap(),
        vec![row(1, "ada"), row(2, "lin")]
    );

    // mutating a restored copy leaves the stored snapshot untouched
    restored
        .context
        .as_mut()
        .unwrap()
        .insert("plan".into(), json!(null));
    let again = snapshots.restore_snapshot("build").await.unwrap();
    assert_eq!(again.context, Some(context));
}

#[tokio::test]
async fn test_failing_facet_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let tables = Arc::new(InMemoryTableStore::new());
    tables.create_table("jobs", vec![row(1, "queued")]).await;
    let snapshots = manager(&dir, tables.clone());

    let file = dir.path().join("config.toml");
    std::fs::write(&file, "v = 1").unwrap();
    let mut context = ContextData::new();
    context.insert("attempt".into(), json!(1));

    let snapshot = snapshots
        .create_snapshot(
            "deploy",
            "Deploy",
            SnapshotOptions::new()
                .with_context(context.clone())
                .with_file(&file)
                .with_table("jobs"),
        )
        .await
        .unwrap();

    // lose the file backup so only the filesystem facet fails
    let backup = &snapshot.files.as_ref().unwrap()[0].backup;
    std::fs::remove_file(backup).unwrap();
    tables.replace_rows("jobs", &[]).await.unwrap();

    let restored = snapshots.restore_snapshot("deploy").await.unwrap();
    assert!(!restored.success);
    assert!(!restored.filesystem_restored);
    assert!(restored.database_restored);
    assert_eq!(restored.errors.len(), 1);
    assert_eq!(restored.context, Some(context));
    assert_eq!(tables.rows("jobs").await.unwrap(), vec![row(1, "queued")]);
}

#[tokio::test]
async fn test_uncaptured_facets_are_not_reported_restored() {
    let dir = tempfile::tempdir().unwrap();
    let snapshots = manager(&dir, Arc::new(InMemoryTableStore::new()));

    snapshots
        .create_snapshot("plan", "Plan", SnapshotOptions::new())
        .await
        .unwrap();
    let restored = snapshots.restore_snapshot("plan").await.unwrap();

    assert!(restored.success);
    assert!(restored.context.is_none());
    assert!(!restored.filesystem_restored);
    assert!(!restored.database_restored);
}
