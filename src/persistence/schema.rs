//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so this runs on
//! every open, including stores the overlay program created first.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the key-value and call-log tables to the connected database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS kv_store (
    key             TEXT PRIMARY KEY NOT NULL,
    value           TEXT NOT NULL,
    created_at      INTEGER NOT NULL,
    updated_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    parameters      TEXT,
    result          TEXT,
    error           TEXT,
    status          TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','success','error')),
    started_at      INTEGER NOT NULL,
    completed_at    INTEGER,
    duration_ms     INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tool_calls_name ON tool_calls(name);
CREATE INDEX IF NOT EXISTS idx_tool_calls_started ON tool_calls(started_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
