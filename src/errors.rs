//! Error types shared across the broker.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with the session store.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC communication failure.
    Ipc(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// The external overlay program is not installed or not runnable.
    MountUnavailable(String),
    /// The overlay process exited, the mount point is unreadable, or the
    /// mount table does not list it.
    MountVerificationFailed(String),
    /// The store stayed locked after the retry budget was spent.
    StoreBusy(String),
    /// A call-log write failed while tracking a tool invocation.
    Tracking(String),
    /// A host-supplied session id cannot name a mount point or store file.
    InvalidSessionId(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::MountUnavailable(msg) => write!(f, "mount unavailable: {msg}"),
            Self::MountVerificationFailed(msg) => write!(f, "mount verification failed: {msg}"),
            Self::StoreBusy(msg) => write!(f, "store busy: {msg}"),
            Self::Tracking(msg) => write!(f, "tracking: {msg}"),
            Self::InvalidSessionId(msg) => write!(f, "invalid session id: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether the error carries the "resource busy / locked" signature that
    /// warrants a retry against a contended store.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        match self {
            Self::StoreBusy(_) => true,
            Self::Db(msg) => is_busy_message(msg),
            _ => false,
        }
    }
}

/// Match `SQLite` lock contention messages (`SQLITE_BUSY`, `SQLITE_LOCKED`).
pub(crate) fn is_busy_message(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("database is locked")
        || lower.contains("database table is locked")
        || lower.contains("sqlite_busy")
        || lower.contains("resource busy")
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
