//! Key-value repository over the session store.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for key-value entries.
#[derive(Debug, Clone)]
pub struct KvRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct KvRow {
    key: String,
    value: String,
}

impl KvRow {
    fn into_pair(self) -> Result<(String, Value)> {
        let value = serde_json::from_str(&self.value)
            .map_err(|e| AppError::Db(format!("invalid value for key {}: {e}", self.key)))?;
        Ok((self.key, value))
    }
}

impl KvRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fetch a value.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails or the stored value is not JSON.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<KvRow> = sqlx::query_as("SELECT key, value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(|r| r.into_pair().map(|(_, v)| v)).transpose()
    }

    /// Insert or replace a value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the upsert fails.
    pub async fn set(&self, key: &str, value: &Value) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let encoded = value.to_string();

        sqlx::query(
            "INSERT INTO kv_store (key, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(key) DO UPDATE
             SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&encoded)
        .bind(now)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Remove a key. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the delete fails.
    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// List all entries whose key starts with `prefix`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let rows: Vec<KvRow> = sqlx::query_as(
            "SELECT key, value FROM kv_store \
             WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(KvRow::into_pair).collect()
    }
}
