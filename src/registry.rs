//! Session registry: the single owner of live session state.
//!
//! Each session id moves through
//! `absent → initializing → {mounted, mount_failed} → store_open → closing → absent`.
//! The table lock is never held across a suspension point; the overlay mount
//! and store open run on a local `Session` that is inserted once
//! initialization has finished.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::session::{validate_session_id, MountInfo, Session, SessionState};
use crate::overlay::MountController;
use crate::persistence::SessionStore;

/// KV key holding the session id.
pub const KEY_ID: &str = "session:id";
/// KV key holding the agent-facing project root.
pub const KEY_PROJECT_PATH: &str = "session:project_path";
/// KV key holding the overlay mount path.
pub const KEY_MOUNT_PATH: &str = "session:mount_path";
/// KV key holding the session start time (epoch milliseconds).
pub const KEY_STARTED_AT: &str = "session:started_at";
/// KV key holding the last mount failure; removed after a successful mount.
pub const KEY_MOUNT_ERROR: &str = "session:mount_error";
/// KV key holding the session end time (epoch milliseconds).
pub const KEY_ENDED_AT: &str = "session:ended_at";

/// Which lifecycle event started the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A fresh session.
    Begin,
    /// The host restarted and referenced an id it already knew.
    Resume,
}

/// Outcome of a begin or resume event.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SessionInit {
    /// Whether this event created the session (false for ignored duplicates).
    pub created: bool,
    /// Whether the overlay is live.
    pub mounted: bool,
    /// Messages the host should show the user.
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct RegistryTables {
    sessions: HashMap<String, Session>,
    initializing: HashSet<String>,
}

/// Removes an id from the initializing set however initialization exits.
struct InitGuard<'a> {
    tables: &'a Mutex<RegistryTables>,
    session_id: String,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        lock(self.tables).initializing.remove(&self.session_id);
    }
}

fn lock(tables: &Mutex<RegistryTables>) -> MutexGuard<'_, RegistryTables> {
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every live session and drives its mount and store lifecycle.
pub struct SessionRegistry {
    config: Arc<GlobalConfig>,
    controller: Arc<MountController>,
    tables: Mutex<RegistryTables>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, controller: Arc<MountController>) -> Self {
        Self {
            config,
            controller,
            tables: Mutex::new(RegistryTables::default()),
        }
    }

    /// The mount controller shared with the broker.
    #[must_use]
    pub fn controller(&self) -> &Arc<MountController> {
        &self.controller
    }

    /// Handle a begin or resume event.
    ///
    /// Ignored when the id is already live or initializing. An id that
    /// cannot name a mount point is refused with a warning. Mount and store
    /// failures never fail the call; they come back as warnings on a
    /// begin and are only logged on a resume.
    pub async fn begin(
        &self,
        session_id: &str,
        project_path: &Path,
        trigger: Trigger,
    ) -> SessionInit {
        if let Err(err) = validate_session_id(session_id) {
            warn!(%err, "refusing session");
            return SessionInit {
                warnings: vec![format!("Session not started: {err}")],
                ..SessionInit::default()
            };
        }

        let Some(_guard) = self.claim(session_id) else {
            debug!(session_id, ?trigger, "session already live or initializing, ignoring");
            return SessionInit::default();
        };

        let span = info_span!("session_begin", session_id, ?trigger);
        let (session, warnings) = self
            .initialize(session_id, project_path, trigger)
            .instrument(span)
            .await;

        let init = SessionInit {
            created: true,
            mounted: session.mount.mounted,
            warnings,
        };
        lock(&self.tables)
            .sessions
            .insert(session_id.to_owned(), session);
        init
    }

    /// Reserve `session_id` for initialization.
    fn claim(&self, session_id: &str) -> Option<InitGuard<'_>> {
        let mut tables = lock(&self.tables);
        if tables.sessions.contains_key(session_id) || tables.initializing.contains(session_id) {
            return None;
        }
        tables.initializing.insert(session_id.to_owned());
        Some(InitGuard {
            tables: &self.tables,
            session_id: session_id.to_owned(),
        })
    }

    async fn initialize(
        &self,
        session_id: &str,
        project_path: &Path,
        trigger: Trigger,
    ) -> (Session, Vec<String>) {
        let mount_path = self.config.mount_path(session_id);
        let store_path = self.config.store_path(session_id);
        let mut session = Session::new(
            session_id,
            project_path,
            MountInfo::new(session_id, project_path, &mount_path, &store_path),
        );
        let mut warnings = Vec::new();

        let dirs_ready = match self.ensure_dirs(&mount_path).await {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id, %err, "failed to create session directories");
                warnings.push(format!("Session directories could not be created: {err}"));
                false
            }
        };

        if dirs_ready && self.config.overlay.auto_mount && self.controller.is_supported() {
            self.mount_step(&mut session, trigger, &mut warnings).await;
        } else if !self.controller.is_supported() {
            debug!(session_id, "overlay mounts not supported on this platform");
        }

        session.advance(if session.mount.mounted {
            SessionState::Mounted
        } else {
            SessionState::MountFailed
        });

        if session.mount.mounted && self.config.overlay.defer_store_when_mounted {
            debug!(session_id, "store left to the overlay process until first use");
        } else {
            match self.open_store(&session).await {
                Ok(store) => {
                    session.store = Some(store);
                    session.advance(SessionState::StoreOpen);
                }
                Err(err) => {
                    warn!(session_id, %err, "failed to open session store");
                    warnings.push(format!("Session store unavailable: {err}"));
                }
            }
        }

        info!(
            session_id,
            mounted = session.mount.mounted,
            state = ?session.state,
            "session initialized"
        );
        (session, warnings)
    }

    async fn ensure_dirs(&self, mount_path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(mount_path).await?;
        tokio::fs::create_dir_all(&self.config.store.dir).await
    }

    async fn mount_step(
        &self,
        session: &mut Session,
        trigger: Trigger,
        warnings: &mut Vec<String>,
    ) {
        if trigger == Trigger::Resume && self.controller.adopt_existing(&mut session.mount).await {
            return;
        }

        if let Err(err) = self
            .controller
            .mount(&mut session.mount, &session.project_path)
            .await
        {
            match trigger {
                Trigger::Begin => {
                    warnings.push(format!("Overlay mount failed, running unsandboxed: {err}"));
                }
                Trigger::Resume => {
                    info!(
                        session_id = %session.session_id,
                        %err,
                        "overlay not remounted on resume"
                    );
                }
            }
        }
    }

    /// Open the session's store and write its metadata.
    async fn open_store(&self, session: &Session) -> crate::Result<SessionStore> {
        let store = SessionStore::open(&session.mount.store_path, &self.config.store).await?;
        write_metadata(&store, session).await;
        Ok(store)
    }

    /// Handle an end event.
    ///
    /// Records the end time, closes the store, unmounts the overlay, then
    /// drops the entry. Each step runs even if the one before it failed. A
    /// no-op for unknown ids and for sessions already closing.
    pub async fn end(&self, session_id: &str) -> bool {
        let snapshot = {
            let mut tables = lock(&self.tables);
            let Some(session) = tables.sessions.get_mut(session_id) else {
                debug!(session_id, "end for unknown session, ignoring");
                return false;
            };
            if session.state == SessionState::Closing || !session.advance(SessionState::Closing) {
                return false;
            }
            session.clone()
        };

        let span = info_span!("session_end", session_id);
        self.teardown(snapshot).instrument(span).await;

        lock(&self.tables).sessions.remove(session_id);
        info!(session_id, "session ended");
        true
    }

    async fn teardown(&self, mut session: Session) {
        if let Some(store) = session.store.take() {
            let ended_at = json!(chrono::Utc::now().timestamp_millis());
            if let Err(err) = store.kv.set(KEY_ENDED_AT, &ended_at).await {
                warn!(%err, "failed to record session end time");
            }
            store.close().await;
        }

        // The store must be closed before the overlay is unmounted.
        self.controller.unmount(&mut session.mount).await;
        if let Some(err) = &session.mount.error {
            debug!(%err, "overlay teardown left an error");
        }
    }

    /// End every live session. Returns how many were ended.
    pub async fn end_all(&self) -> usize {
        let ids: Vec<String> = lock(&self.tables).sessions.keys().cloned().collect();
        let mut ended = 0;
        for id in ids {
            if self.end(&id).await {
                ended += 1;
            }
        }
        ended
    }

    /// Snapshot of a live session; `None` if the id is not live.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Session> {
        lock(&self.tables).sessions.get(session_id).cloned()
    }

    /// Snapshot of every live session.
    #[must_use]
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = lock(&self.tables).sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Whether a begin for `session_id` is still in progress.
    #[must_use]
    pub fn is_initializing(&self, session_id: &str) -> bool {
        lock(&self.tables).initializing.contains(session_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.tables).sessions.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The session's store handle, opening it on first use if it was deferred.
    ///
    /// `None` for unknown or closing sessions, and when the store cannot be
    /// opened.
    pub async fn store(&self, session_id: &str) -> Option<SessionStore> {
        let session = {
            let tables = lock(&self.tables);
            let session = tables.sessions.get(session_id)?;
            if session.state == SessionState::Closing {
                return None;
            }
            if let Some(store) = &session.store {
                return Some(store.clone());
            }
            session.clone()
        };

        let store = match self.open_store(&session).await {
            Ok(store) => store,
            Err(err) => {
                warn!(session_id, %err, "failed to open deferred session store");
                return None;
            }
        };

        let lost_to = {
            let mut tables = lock(&self.tables);
            match tables.sessions.get_mut(session_id) {
                Some(live) if live.state != SessionState::Closing => match &live.store {
                    Some(existing) => Err(Some(existing.clone())),
                    None => {
                        live.store = Some(store.clone());
                        live.advance(SessionState::StoreOpen);
                        Ok(())
                    }
                },
                _ => Err(None),
            }
        };

        match lost_to {
            Ok(()) => Some(store),
            Err(existing) => {
                store.close().await;
                existing
            }
        }
    }
}

/// Write the session's identifying metadata. Failures are logged.
async fn write_metadata(store: &SessionStore, session: &Session) {
    let entries: [(&str, Value); 4] = [
        (KEY_ID, json!(session.session_id)),
        (KEY_PROJECT_PATH, json!(session.project_root())),
        (KEY_MOUNT_PATH, json!(session.mount_root())),
        (KEY_STARTED_AT, json!(session.created_at.timestamp_millis())),
    ];
    for (key, value) in &entries {
        if let Err(err) = store.kv.set(key, value).await {
            warn!(session_id = %session.session_id, key, %err, "failed to write session metadata");
        }
    }

    let mount_error = match &session.mount.error {
        Some(err) if !session.mount.mounted => store.kv.set(KEY_MOUNT_ERROR, &json!(err)).await,
        _ => store.kv.delete(KEY_MOUNT_ERROR).await,
    };
    if let Err(err) = mount_error {
        warn!(session_id = %session.session_id, %err, "failed to update mount error");
    }
}
