//! Hook adapter: the broker's single entry point for host events.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info_span, Instrument};

use crate::models::session::Session;
use crate::paths::{
    is_within, normalize, rewrite_in_string, rewrite_relative_output, to_mount_path,
};
use crate::persistence::SessionStore;
use crate::registry::{SessionInit, SessionRegistry, Trigger};
use crate::tracking::{CallTracker, ToolOutcome};
use crate::{AppError, Result};

use super::event::{HookEvent, ToolInput, ToolOutput};

/// Project and mount roots of a sandboxed session, normalized.
struct Roots {
    project: String,
    mount: String,
}

impl Roots {
    fn of(session: &Session) -> Option<Self> {
        session.is_sandboxed().then(|| Self {
            project: normalize(&session.project_root()),
            mount: normalize(&session.mount_root()),
        })
    }
}

/// Routes host events to the registry, translator, and tracker.
pub struct HookAdapter {
    registry: Arc<SessionRegistry>,
    tracker: Arc<CallTracker>,
}

impl HookAdapter {
    /// Create an adapter over shared components.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, tracker: Arc<CallTracker>) -> Self {
        Self { registry, tracker }
    }

    /// The registry this adapter drives.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The tracker this adapter drives.
    #[must_use]
    pub fn tracker(&self) -> &Arc<CallTracker> {
        &self.tracker
    }

    /// Before-hook: rewrite arguments into the mount and record the call start.
    pub async fn before_tool(&self, input: &mut ToolInput) {
        let span = info_span!(
            "tool_before",
            session_id = %input.session_id,
            call_id = %input.call_id,
            tool = %input.tool
        );
        async {
            let original = input.args.clone();
            let session = self.registry.get(&input.session_id);
            if let Some(roots) = session.as_ref().and_then(Roots::of) {
                rewrite_request(&mut input.args, &roots);
            }

            if !self.tracker.policy().should_track(&input.tool) {
                return;
            }
            match self.registry.store(&input.session_id).await {
                Some(store) => self.tracker.begin(
                    store.call_log(),
                    &input.session_id,
                    &input.call_id,
                    &input.tool,
                    original,
                ),
                None => debug!("no store for session, call not tracked"),
            }
        }
        .instrument(span)
        .await;
    }

    /// After-hook: rewrite results back to project paths and record the outcome.
    pub async fn after_tool(&self, output: &mut ToolOutput) {
        let span = info_span!(
            "tool_after",
            session_id = %output.session_id,
            call_id = %output.call_id,
            tool = %output.tool
        );
        async {
            let session = self.registry.get(&output.session_id);
            if let Some(roots) = session.as_ref().and_then(Roots::of) {
                output.title = rewrite_in_string(&output.title, &roots.mount, &roots.project);
                output.output =
                    rewrite_relative_output(&output.output, &roots.mount, &roots.project);
                rewrite_strings(&mut output.metadata, &|s| {
                    rewrite_in_string(s, &roots.mount, &roots.project)
                });
            }

            let outcome = ToolOutcome {
                title: output.title.clone(),
                output: output.output.clone(),
                metadata: output.metadata.clone(),
            };
            self.tracker
                .end(&output.session_id, &output.call_id, &output.tool, &outcome)
                .await;
        }
        .instrument(span)
        .await;
    }

    /// Dispatch one event and produce its response payload.
    ///
    /// # Errors
    ///
    /// Query commands return `AppError::NotFound` for unknown sessions and
    /// `AppError::Db` on store failures. Lifecycle and tool events do not fail.
    pub async fn handle(&self, event: HookEvent) -> Result<Value> {
        match event {
            HookEvent::SessionBegin {
                session_id,
                project_path,
            } => {
                let init = self.registry.begin(&session_id, &project_path, Trigger::Begin).await;
                to_json(&init)
            }
            HookEvent::SessionResume {
                session_id,
                project_path,
            } => {
                let init: SessionInit = self
                    .registry
                    .begin(&session_id, &project_path, Trigger::Resume)
                    .await;
                to_json(&init)
            }
            HookEvent::SessionEnd { session_id } => {
                let ended = self.registry.end(&session_id).await;
                self.tracker.forget_session(&session_id);
                Ok(json!({ "ended": ended }))
            }
            HookEvent::ToolBefore(mut input) => {
                self.before_tool(&mut input).await;
                Ok(json!({ "args": input.args }))
            }
            HookEvent::ToolAfter(mut output) => {
                self.after_tool(&mut output).await;
                Ok(json!({
                    "title": output.title,
                    "output": output.output,
                    "metadata": output.metadata,
                }))
            }
            HookEvent::Sessions => Ok(json!({ "sessions": to_json(&self.registry.list())? })),
            HookEvent::Calls {
                session_id,
                name,
                offset,
                limit,
            } => {
                let log = self.require_store(&session_id).await?.call_log();
                let calls = match name {
                    Some(name) => {
                        self.tracker
                            .by_name(&log, &session_id, &name, limit)
                            .await?
                    }
                    None => self.tracker.recent(&log, &session_id, offset, limit).await?,
                };
                Ok(json!({ "calls": to_json(&calls)? }))
            }
            HookEvent::Stats { session_id } => {
                let log = self.require_store(&session_id).await?.call_log();
                let stats = self.tracker.stats(&log, &session_id).await?;
                Ok(json!({ "stats": to_json(&stats)? }))
            }
            HookEvent::Kv { session_id, prefix } => {
                let store = self.require_store(&session_id).await?;
                let entries: Map<String, Value> =
                    store.kv.list_prefix(&prefix).await?.into_iter().collect();
                Ok(json!({ "entries": entries }))
            }
        }
    }

    async fn require_store(&self, session_id: &str) -> Result<SessionStore> {
        self.registry
            .store(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("no open store for session {session_id}")))
    }
}

/// Rewrite every string in a request's arguments from project to mount paths.
fn rewrite_request(args: &mut Value, roots: &Roots) {
    rewrite_strings(args, &|s| {
        if !is_standalone_path(s) {
            rewrite_in_string(s, &roots.project, &roots.mount)
        } else if is_within(s, &roots.project) {
            to_mount_path(s, &roots.project, &roots.mount)
        } else {
            s.to_owned()
        }
    });
}

fn is_standalone_path(s: &str) -> bool {
    s.starts_with('/') && !s.contains(char::is_whitespace)
}

fn rewrite_strings(value: &mut Value, rewrite: &dyn Fn(&str) -> String) {
    match value {
        Value::String(s) => {
            let rewritten = rewrite(s);
            if rewritten != *s {
                *s = rewritten;
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_strings(item, rewrite);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                rewrite_strings(item, rewrite);
            }
        }
        _ => {}
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| AppError::Ipc(format!("serialization failed: {err}")))
}
