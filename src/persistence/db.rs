//! `SQLite` connection setup with lock-contention retry.
//!
//! The overlay process writes the same store file the broker reads, so every
//! open goes through a bounded exponential backoff on the busy/locked
//! signature on top of the connection's own `busy_timeout`.

use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::{AppError, Result};

use super::schema;

/// Alias for the shared `SQLite` pool.
pub type Database = SqlitePool;

/// Connections kept per session store.
const MAX_CONNECTIONS: u32 = 4;

/// Connect to the store file at `path` once and bootstrap the schema.
///
/// # Errors
///
/// Returns `AppError::Io` if the parent directory cannot be created, or
/// `AppError::Db` if connecting or applying the schema fails.
pub async fn connect(path: &Path, config: &StoreConfig) -> Result<Database> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| AppError::Io(format!("failed to create store dir: {err}")))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Open the store at `path`, retrying while it is locked by another process.
///
/// # Errors
///
/// Returns `AppError::StoreBusy` once `config.retry_attempts` attempts have
/// all failed on lock contention, or the first non-busy error unchanged.
pub async fn open_with_retry(path: &Path, config: &StoreConfig) -> Result<Database> {
    retry_busy(
        config.retry_attempts,
        Duration::from_millis(config.retry_base_delay_ms),
        || connect(path, config),
    )
    .await
}

/// Create an in-memory pool with the full schema, for tests.
///
/// # Errors
///
/// Returns `AppError::Db` if the pool cannot be created.
pub async fn connect_memory() -> Result<Database> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    schema::bootstrap_schema(&pool).await?;
    Ok(pool)
}

/// Run `op` up to `attempts` times, doubling the delay after each busy failure.
///
/// Errors without the busy signature are returned immediately.
///
/// # Errors
///
/// Returns `AppError::StoreBusy` when every attempt hit lock contention.
pub async fn retry_busy<T, F, Fut>(attempts: u32, base_delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_busy() => {
                if attempt >= attempts {
                    warn!(attempts, %err, "store still locked, giving up");
                    return Err(AppError::StoreBusy(format!(
                        "locked after {attempts} attempts: {err}"
                    )));
                }
                debug!(attempt, delay_ms = delay.as_millis(), "store locked, backing off");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
