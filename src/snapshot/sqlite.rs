//! SQLite-backed table store

use crate::snapshot::table::{Row, TableStore};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

/// Table store over an existing SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteTableStore {
    pool: SqlitePool,
}

impl SqliteTableStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database file
    pub async fn connect(db_path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}", db_path))
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted
fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        bail!("Invalid SQL identifier: {:?}", name);
    }
    Ok(())
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name)
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" => Number::from_f64(row.try_get::<f64, _>(index)?)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => Value::from(row.try_get::<Vec<u8>, _>(index)?),
                _ => Value::String(row.try_get::<String, _>(index)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn as_blob(items: &[Value]) -> Option<Vec<u8>> {
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        Value::Array(items) => match as_blob(items) {
            Some(bytes) if !items.is_empty() => query.bind(bytes),
            _ => query.bind(value.to_string()),
        },
        Value::Object(_) => query.bind(value.to_string()),
    }
}

#[async_trait]
impl TableStore for SqliteTableStore {
    async fn read_rows(&self, table: &str) -> Result<Vec<Row>> {
        validate_identifier(table)?;
        let sql = format!("SELECT * FROM {}", quote(table));
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to read table {}", table))?;
        rows.iter().map(decode_row).collect()
    }

    async fn replace_rows(&self, table: &str, rows: &[Row]) -> Result<()> {
        validate_identifier(table)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!("DELETE FROM {}", quote(table)))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear table {}", table))?;

        for row in rows {
            let sql = if row.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", quote(table))
            } else {
                let mut columns = Vec::with_capacity(row.len());
                for name in row.keys() {
                    validate_identifier(name)?;
                    columns.push(quote(name));
                }
                let placeholders = vec!["?"; row.len()].join(", ");
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote(table),
                    columns.join(", "),
                    placeholders
                )
            };

            let mut query = sqlx::query(&sql);
            for value in row.values() {
                query = bind_value(query, value);
            }
            query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert into {}", table))?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> SqliteTableStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price REAL, tag TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO items (id, name, price, tag) VALUES (1, 'apple', 0.5, NULL), (2, 'pear', 1.25, 'ripe')")
            .execute(&pool)
            .await
            .unwrap();
        SqliteTableStore::new(pool)
    }

    #[tokio::test]
    async fn test_read_rows_as_json() {
        let store = store().await;
        let rows = store.read_rows("items").await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["name"], json!("apple"));
        assert_eq!(rows[0]["price"], json!(0.5));
        assert_eq!(rows[0]["tag"], Value::Null);
    }

    #[tokio::test]
    async fn test_replace_rows_round_trip() {
        let store = store().await;
        let before = store.read_rows("items").await.unwrap();

        sqlx::query("INSERT INTO items (id, name) VALUES (3, 'plum')")
            .execute(store.pool())
            .await
            .unwrap();
        assert_eq!(store.read_rows("items").await.unwrap().len(), 3);

        store.replace_rows("items", &before).await.unwrap();
        assert_eq!(store.read_rows("items").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_identifiers() {
        let store = store().await;
        assert!(store.read_rows("items; DROP TABLE items").await.is_err());
        assert!(store.read_rows("").await.is_err());

        let mut row = Row::new();
        row.insert("id\"".into(), json!(1));
        assert!(store.replace_rows("items", &[row]).await.is_err());
        // the failed transaction left the table untouched
        assert_eq!(store.read_rows("items").await.unwrap().len(), 2);
    }
}
