//! Append-only call log over the session store.
//!
//! A tracked invocation is written once as `pending` and later updated in
//! place to `success` or `error`; [`CallLog::record`] is the single-shot
//! fallback for calls whose pending row could not be created.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::models::tool_call::{CallRecord, ToolCall, ToolCallStats, ToolCallStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Boxed future returned by [`CallLog`] methods.
pub type CallLogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Store interface the call tracker depends on.
pub trait CallLog: Send + Sync {
    /// Insert a pending row and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    fn start(&self, name: String, parameters: Value) -> CallLogFuture<'_, i64>;

    /// Complete a pending row successfully.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    fn success(&self, id: i64, result: Value) -> CallLogFuture<'_, ()>;

    /// Complete a pending row with an error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    fn error(&self, id: i64, message: String) -> CallLogFuture<'_, ()>;

    /// Write one complete row in a single step.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    fn record(&self, record: CallRecord) -> CallLogFuture<'_, i64>;

    /// Most recent rows for one tool, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    fn get_by_name(&self, name: String, limit: i64) -> CallLogFuture<'_, Vec<ToolCall>>;

    /// Rows across all tools, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    fn get_recent(&self, offset: i64, limit: i64) -> CallLogFuture<'_, Vec<ToolCall>>;

    /// Per-tool aggregates.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    fn get_stats(&self) -> CallLogFuture<'_, Vec<ToolCallStats>>;
}

/// Repository wrapper around `SQLite` for call-log rows.
#[derive(Debug, Clone)]
pub struct CallLogRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ToolCallRow {
    id: i64,
    name: String,
    parameters: Option<String>,
    result: Option<String>,
    error: Option<String>,
    status: String,
    started_at: i64,
    completed_at: Option<i64>,
    duration_ms: Option<i64>,
}

impl ToolCallRow {
    /// Convert a database row into the domain model.
    fn into_tool_call(self) -> Result<ToolCall> {
        let status = parse_status(&self.status)?;
        let parameters = decode_json(self.parameters.as_deref(), "parameters")?;
        let result = decode_json(self.result.as_deref(), "result")?;

        Ok(ToolCall {
            id: self.id,
            name: self.name,
            parameters,
            result,
            error: self.error,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    name: String,
    total: i64,
    successful: i64,
    failed: i64,
    avg_duration_ms: Option<f64>,
}

fn parse_status(s: &str) -> Result<ToolCallStatus> {
    match s {
        "pending" => Ok(ToolCallStatus::Pending),
        "success" => Ok(ToolCallStatus::Success),
        "error" => Ok(ToolCallStatus::Error),
        other => Err(AppError::Db(format!("invalid tool call status: {other}"))),
    }
}

fn decode_json(raw: Option<&str>, column: &str) -> Result<Option<Value>> {
    raw.map(serde_json::from_str)
        .transpose()
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl CallLogRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a pending row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn start(&self, name: &str, parameters: &Value) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO tool_calls (name, parameters, status, started_at)
             VALUES (?1, ?2, 'pending', ?3)",
        )
        .bind(name)
        .bind(parameters.to_string())
        .bind(now_millis())
        .execute(self.db.as_ref())
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Mark a row successful, storing `result`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no row has this id, or `AppError::Db`.
    pub async fn success(&self, id: i64, result: &Value) -> Result<()> {
        self.complete(id, ToolCallStatus::Success, Some(result.to_string()), None)
            .await
    }

    /// Mark a row failed, storing `message`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no row has this id, or `AppError::Db`.
    pub async fn error(&self, id: i64, message: &str) -> Result<()> {
        self.complete(id, ToolCallStatus::Error, None, Some(message))
            .await
    }

    async fn complete(
        &self,
        id: i64,
        status: ToolCallStatus,
        result: Option<String>,
        error: Option<&str>,
    ) -> Result<()> {
        let done = sqlx::query(
            "UPDATE tool_calls SET status = ?1, result = ?2, error = ?3,
             completed_at = ?4, duration_ms = ?4 - started_at WHERE id = ?5",
        )
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        if done.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("tool call {id} not found")));
        }
        Ok(())
    }

    /// Insert a complete row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn record(&self, record: &CallRecord) -> Result<i64> {
        let status = if record.error.is_some() {
            ToolCallStatus::Error
        } else {
            ToolCallStatus::Success
        };

        let id = sqlx::query(
            "INSERT INTO tool_calls (name, parameters, result, error, status,
             started_at, completed_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&record.name)
        .bind(record.parameters.to_string())
        .bind(record.result.as_ref().map(Value::to_string))
        .bind(&record.error)
        .bind(status.as_str())
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.completed_at - record.started_at)
        .execute(self.db.as_ref())
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    /// Retrieve a row by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<ToolCall>> {
        let row: Option<ToolCallRow> = sqlx::query_as("SELECT * FROM tool_calls WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(ToolCallRow::into_tool_call).transpose()
    }

    /// Most recent rows for one tool.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_name(&self, name: &str, limit: i64) -> Result<Vec<ToolCall>> {
        let rows: Vec<ToolCallRow> = sqlx::query_as(
            "SELECT * FROM tool_calls WHERE name = ?1 \
             ORDER BY started_at DESC, id DESC LIMIT ?2",
        )
        .bind(name)
        .bind(limit)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ToolCallRow::into_tool_call).collect()
    }

    /// Rows across all tools, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_recent(&self, offset: i64, limit: i64) -> Result<Vec<ToolCall>> {
        let rows: Vec<ToolCallRow> = sqlx::query_as(
            "SELECT * FROM tool_calls ORDER BY started_at DESC, id DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ToolCallRow::into_tool_call).collect()
    }

    /// Per-tool aggregates, busiest tool first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_stats(&self) -> Result<Vec<ToolCallStats>> {
        let rows: Vec<StatsRow> = sqlx::query_as(
            "SELECT name,
                    COUNT(*) AS total,
                    SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS successful,
                    SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS failed,
                    AVG(duration_ms) AS avg_duration_ms
             FROM tool_calls GROUP BY name ORDER BY total DESC, name",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ToolCallStats {
                name: r.name,
                total: r.total,
                successful: r.successful,
                failed: r.failed,
                avg_duration_ms: r.avg_duration_ms.unwrap_or(0.0),
            })
            .collect())
    }
}

impl CallLog for CallLogRepo {
    fn start(&self, name: String, parameters: Value) -> CallLogFuture<'_, i64> {
        Box::pin(async move { CallLogRepo::start(self, &name, &parameters).await })
    }

    fn success(&self, id: i64, result: Value) -> CallLogFuture<'_, ()> {
        Box::pin(async move { CallLogRepo::success(self, id, &result).await })
    }

    fn error(&self, id: i64, message: String) -> CallLogFuture<'_, ()> {
        Box::pin(async move { CallLogRepo::error(self, id, &message).await })
    }

    fn record(&self, record: CallRecord) -> CallLogFuture<'_, i64> {
        Box::pin(async move { CallLogRepo::record(self, &record).await })
    }

    fn get_by_name(&self, name: String, limit: i64) -> CallLogFuture<'_, Vec<ToolCall>> {
        Box::pin(async move { CallLogRepo::get_by_name(self, &name, limit).await })
    }

    fn get_recent(&self, offset: i64, limit: i64) -> CallLogFuture<'_, Vec<ToolCall>> {
        Box::pin(async move { CallLogRepo::get_recent(self, offset, limit).await })
    }

    fn get_stats(&self) -> CallLogFuture<'_, Vec<ToolCallStats>> {
        Box::pin(CallLogRepo::get_stats(self))
    }
}
