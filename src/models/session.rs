//! Session and mount models with lifecycle helpers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::persistence::SessionStore;
use crate::{AppError, Result};

/// Check that a host-supplied session id is a single plain path component.
///
/// The id names both the mount point and the store file, so it must not be
/// empty, `.`, or contain `..`, a path separator, or a NUL byte.
///
/// # Errors
///
/// Returns `AppError::InvalidSessionId` naming the offending id.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let bad = session_id.is_empty()
        || session_id == "."
        || session_id.contains("..")
        || session_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(AppError::InvalidSessionId(format!("{session_id:?}")));
    }
    Ok(())
}

/// Lifecycle state of a session id inside the registry.
///
/// `absent` is represented by the id not being registered at all.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Directories, mount, and store are being prepared.
    Initializing,
    /// Overlay verified live; store not (yet) open in-process.
    Mounted,
    /// Mount attempt failed or was skipped; the session runs unsandboxed.
    MountFailed,
    /// Store handle open in-process.
    StoreOpen,
    /// Teardown in progress.
    Closing,
}

impl SessionState {
    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (
                SessionState::Initializing,
                SessionState::Mounted | SessionState::MountFailed | SessionState::Closing
            ) | (
                SessionState::Mounted | SessionState::MountFailed,
                SessionState::StoreOpen | SessionState::Closing
            ) | (SessionState::StoreOpen, SessionState::Closing)
        )
    }
}

/// Overlay mount bookkeeping for one session.
///
/// Only the mount controller mutates this record. `pid` is set only while
/// `mounted` is true; `error` holds the most recent mount or unmount failure.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MountInfo {
    /// Owning session identifier.
    pub session_id: String,
    /// Read-only base directory the overlay layers over.
    pub project_path: PathBuf,
    /// Where the overlay is presented.
    pub mount_path: PathBuf,
    /// Store file backing the overlay's delta.
    pub store_path: PathBuf,
    /// Whether the overlay is verified live.
    pub mounted: bool,
    /// Process id of the tracked mount process.
    pub pid: Option<u32>,
    /// Last mount or unmount failure message.
    pub error: Option<String>,
}

impl MountInfo {
    /// Build an unmounted record.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        mount_path: impl Into<PathBuf>,
        store_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project_path: project_path.into(),
            mount_path: mount_path.into(),
            store_path: store_path.into(),
            mounted: false,
            pid: None,
            error: None,
        }
    }
}

/// A live session entry owned by the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Host-assigned session identifier.
    pub session_id: String,
    /// Agent-facing project root.
    pub project_path: PathBuf,
    /// Mount bookkeeping.
    pub mount: MountInfo,
    /// Current lifecycle state.
    pub state: SessionState,
    /// When the registry created the entry.
    pub created_at: DateTime<Utc>,
    /// Open store handle, absent until opened.
    #[serde(skip)]
    pub store: Option<SessionStore>,
}

impl Session {
    /// Construct a session in the `Initializing` state.
    #[must_use]
    pub fn new(session_id: impl Into<String>, project_path: &Path, mount: MountInfo) -> Self {
        Self {
            session_id: session_id.into(),
            project_path: project_path.to_path_buf(),
            mount,
            state: SessionState::Initializing,
            created_at: Utc::now(),
            store: None,
        }
    }

    /// Move to `next` if the lifecycle allows it.
    ///
    /// An illegal move is logged and leaves the state unchanged. Returns
    /// whether the state changed.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(
                session_id = %self.session_id,
                from = ?self.state,
                to = ?next,
                "illegal session state transition"
            );
            return false;
        }
        self.state = next;
        true
    }

    /// Whether path translation should be applied for this session.
    #[must_use]
    pub fn is_sandboxed(&self) -> bool {
        self.mount.mounted
    }

    /// Project root as a string for the path translator.
    #[must_use]
    pub fn project_root(&self) -> String {
        self.project_path.to_string_lossy().into_owned()
    }

    /// Mount root as a string for the path translator.
    #[must_use]
    pub fn mount_root(&self) -> String {
        self.mount.mount_path.to_string_lossy().into_owned()
    }
}
