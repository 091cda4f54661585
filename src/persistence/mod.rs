//! Persistence layer modules.
//!
//! Each session owns one `SQLite` file shared with the overlay process. It
//! carries a small key-value table and the tool call log.

pub mod call_repo;
pub mod db;
pub mod kv_repo;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::Result;

use self::call_repo::{CallLog, CallLogRepo};
use self::db::Database;
use self::kv_repo::KvRepo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Open handle to one session's store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: Arc<Database>,
    /// Key-value metadata.
    pub kv: KvRepo,
    /// Tool call log.
    pub calls: Arc<CallLogRepo>,
}

impl SessionStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(db: Database) -> Self {
        let db = Arc::new(db);
        Self {
            kv: KvRepo::new(Arc::clone(&db)),
            calls: Arc::new(CallLogRepo::new(Arc::clone(&db))),
            db,
        }
    }

    /// Open the store file at `path` with lock-contention retry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreBusy` if the file stays locked, or
    /// `AppError::Db` / `AppError::Io` for other failures.
    pub async fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        let db = db::open_with_retry(path, config).await?;
        Ok(Self::new(db))
    }

    /// The call log behind the tracker's store interface.
    #[must_use]
    pub fn call_log(&self) -> Arc<dyn CallLog> {
        Arc::clone(&self.calls) as Arc<dyn CallLog>
    }

    /// Close every pooled connection, releasing the file for other processes.
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Whether [`SessionStore::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.db.is_closed()
    }
}
