//! Tabular data access used for table snapshots

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One table row, column name to value
pub type Row = Map<String, Value>;

/// Backend able to read and overwrite whole tables
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Read every row of a table
    async fn read_rows(&self, table: &str) -> Result<Vec<Row>>;

    /// Delete all rows of a table and insert `rows` in their place
    async fn replace_rows(&self, table: &str, rows: &[Row]) -> Result<()>;
}

/// In-memory tables (for testing or ephemeral use)
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_table(&self, name: impl Into<String>, rows: Vec<Row>) {
        self.tables.write().await.insert(name.into(), rows);
    }

    pub async fn rows(&self, name: &str) -> Option<Vec<Row>> {
        self.tables.read().await.get(name).cloned()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn read_rows(&self, table: &str) -> Result<Vec<Row>> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .ok_or_else(|| anyhow!("No such table: {}", table))
    }

    async fn replace_rows(&self, table: &str, rows: &[Row]) -> Result<()> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .get_mut(table)
            .ok_or_else(|| anyhow!("No such table: {}", table))?;
        *existing = rows.to_vec();
        Ok(())
    }
}
