//! Pending → success/error lifecycle for tool invocations.
//!
//! `begin` inserts the pending entry synchronously and hands the store write
//! to a background task, so a duplicate begin is suppressed immediately and
//! the caller never waits on the store. The record id is kept as a shared
//! future that `end`, and any query that must see the pending row, can await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::TrackingConfig;
use crate::models::tool_call::{CallRecord, ToolCall, ToolCallStats};
use crate::persistence::call_repo::CallLog;
use crate::{AppError, Result};

use super::outcome::{classify, truncate_output, Classification, ToolOutcome};
use super::policy::TrackingPolicy;

/// Identity of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    /// Owning session.
    pub session_id: String,
    /// Host-assigned call id, unique within the session.
    pub call_id: String,
}

impl CallKey {
    /// Build a key.
    #[must_use]
    pub fn new(session_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: call_id.into(),
        }
    }
}

/// Record id of the pending row; `None` when its creation failed.
pub type RecordIdFuture = Shared<BoxFuture<'static, Option<i64>>>;

struct PendingCall {
    tool: String,
    started_at: i64,
    args: Value,
    record_id: RecordIdFuture,
    log: Arc<dyn CallLog>,
}

/// Tracks in-flight tool calls across all sessions.
pub struct CallTracker {
    policy: TrackingPolicy,
    max_output_bytes: usize,
    pending: Mutex<HashMap<CallKey, PendingCall>>,
}

impl CallTracker {
    /// Create a tracker.
    #[must_use]
    pub fn new(policy: TrackingPolicy, max_output_bytes: usize) -> Self {
        Self {
            policy,
            max_output_bytes,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the `[tracking]` configuration.
    #[must_use]
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(TrackingPolicy::from_config(config), config.max_output_bytes)
    }

    /// The policy deciding which tools are tracked.
    #[must_use]
    pub fn policy(&self) -> &TrackingPolicy {
        &self.policy
    }

    fn table(&self) -> MutexGuard<'_, HashMap<CallKey, PendingCall>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the start of a tool call.
    ///
    /// A no-op for untracked tools and for a key that is already pending.
    /// Must be called from within a Tokio runtime.
    pub fn begin(
        &self,
        log: Arc<dyn CallLog>,
        session_id: &str,
        call_id: &str,
        tool: &str,
        args: Value,
    ) {
        if !self.policy.should_track(tool) {
            return;
        }

        let key = CallKey::new(session_id, call_id);
        let mut table = self.table();
        if table.contains_key(&key) {
            debug!(session_id, call_id, tool, "duplicate begin ignored");
            return;
        }

        let started_at = chrono::Utc::now().timestamp_millis();
        let record_id = spawn_start(Arc::clone(&log), &key, tool, args.clone());
        table.insert(
            key,
            PendingCall {
                tool: tool.to_owned(),
                started_at,
                args,
                record_id,
                log,
            },
        );
    }

    /// Record the completion of a tool call.
    ///
    /// Updates the pending row in place; falls back to writing one complete
    /// row only when the pending row was never created. A no-op when nothing
    /// is pending for the key. Store failures are logged, never returned.
    pub async fn end(&self, session_id: &str, call_id: &str, tool: &str, outcome: &ToolOutcome) {
        if !self.policy.should_track(tool) {
            return;
        }

        let key = CallKey::new(session_id, call_id);
        let Some(pending) = self.table().remove(&key) else {
            debug!(session_id, call_id, tool, "no pending call to complete");
            return;
        };

        let span = info_span!("track_end", session_id, call_id, tool);
        self.complete(pending, outcome).instrument(span).await;
    }

    async fn complete(&self, pending: PendingCall, outcome: &ToolOutcome) {
        let classification = classify(&outcome.output);
        let record_id = pending.record_id.clone().await;

        let written = match (record_id, classification) {
            (Some(id), Classification::Success) => {
                pending
                    .log
                    .success(id, outcome.success_payload(self.max_output_bytes))
                    .await
            }
            (Some(id), Classification::Error(message)) => {
                pending
                    .log
                    .error(id, truncate_output(&message, self.max_output_bytes).to_owned())
                    .await
            }
            (None, classification) => {
                let (result, error) = match classification {
                    Classification::Success => {
                        (Some(outcome.success_payload(self.max_output_bytes)), None)
                    }
                    Classification::Error(message) => (
                        None,
                        Some(truncate_output(&message, self.max_output_bytes).to_owned()),
                    ),
                };
                let record = CallRecord {
                    name: pending.tool.clone(),
                    started_at: pending.started_at,
                    completed_at: chrono::Utc::now().timestamp_millis(),
                    parameters: pending.args.clone(),
                    result,
                    error,
                };
                pending.log.record(record).await.map(|_| ())
            }
        };

        if let Err(err) = written {
            let err = AppError::Tracking(format!("{} outcome: {err}", pending.tool));
            warn!(%err, "failed to record tool call outcome");
        }
    }

    /// Whether a call is between its begin and end events.
    #[must_use]
    pub fn is_pending(&self, session_id: &str, call_id: &str) -> bool {
        self.table().contains_key(&CallKey::new(session_id, call_id))
    }

    /// Number of pending calls for a session.
    #[must_use]
    pub fn pending_count(&self, session_id: &str) -> usize {
        self.table()
            .keys()
            .filter(|k| k.session_id == session_id)
            .count()
    }

    /// Drop every pending call of `session_id` without completing it.
    ///
    /// Their rows stay `pending` in the store. Returns how many were dropped.
    pub fn forget_session(&self, session_id: &str) -> usize {
        let mut table = self.table();
        let before = table.len();
        table.retain(|key, _| key.session_id != session_id);
        let dropped = before - table.len();
        if dropped > 0 {
            debug!(session_id, dropped, "abandoned pending calls of ended session");
        }
        dropped
    }

    /// Wait until every pending row of `session_id` exists in the store.
    pub async fn flush(&self, session_id: &str) {
        let futures: Vec<RecordIdFuture> = self
            .table()
            .iter()
            .filter(|(k, _)| k.session_id == session_id)
            .map(|(_, p)| p.record_id.clone())
            .collect();
        join_all(futures).await;
    }

    /// Recent calls for a session, pending ones included.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store query fails.
    pub async fn recent(
        &self,
        log: &Arc<dyn CallLog>,
        session_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<ToolCall>> {
        self.flush(session_id).await;
        let calls = log.get_recent(offset, limit).await?;
        Ok(calls
            .into_iter()
            .filter(|c| !self.policy.is_excluded(&c.name))
            .collect())
    }

    /// Recent calls of one tool for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store query fails.
    pub async fn by_name(
        &self,
        log: &Arc<dyn CallLog>,
        session_id: &str,
        name: &str,
        limit: i64,
    ) -> Result<Vec<ToolCall>> {
        if self.policy.is_excluded(name) {
            return Ok(Vec::new());
        }
        self.flush(session_id).await;
        log.get_by_name(name.to_owned(), limit).await
    }

    /// Per-tool statistics for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the store query fails.
    pub async fn stats(
        &self,
        log: &Arc<dyn CallLog>,
        session_id: &str,
    ) -> Result<Vec<ToolCallStats>> {
        self.flush(session_id).await;
        let stats = log.get_stats().await?;
        Ok(stats
            .into_iter()
            .filter(|s| !self.policy.is_excluded(&s.name))
            .collect())
    }
}

/// Start the pending-row insert in the background.
fn spawn_start(log: Arc<dyn CallLog>, key: &CallKey, tool: &str, args: Value) -> RecordIdFuture {
    let tool = tool.to_owned();
    let session_id = key.session_id.clone();
    let call_id = key.call_id.clone();

    let handle = tokio::spawn(async move {
        match log.start(tool.clone(), args).await {
            Ok(id) => Some(id),
            Err(err) => {
                let err = AppError::Tracking(format!("{tool} start: {err}"));
                warn!(%session_id, %call_id, %err, "failed to create pending call record");
                None
            }
        }
    });

    async move {
        handle.await.unwrap_or_else(|err| {
            warn!(%err, "pending call record task failed");
            None
        })
    }
    .boxed()
    .shared()
}
