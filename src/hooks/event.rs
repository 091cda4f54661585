//! Events delivered by the host's hooks, and the broker's query commands.
//!
//! Each request line carries a `command` tag:
//!
//! ```json
//! {"command": "session_begin", "session_id": "s1", "project_path": "/work/app"}
//! {"command": "tool_before", "tool": "bash", "session_id": "s1", "call_id": "c1", "args": {}}
//! {"command": "tool_after", "tool": "bash", "session_id": "s1", "call_id": "c1", "output": ""}
//! {"command": "session_end", "session_id": "s1"}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_limit() -> i64 {
    50
}

/// What the before-hook sees of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    /// Tool name.
    pub tool: String,
    /// Owning session.
    pub session_id: String,
    /// Host-assigned call id.
    pub call_id: String,
    /// Tool arguments, rewritten in place.
    #[serde(default)]
    pub args: Value,
}

/// What the after-hook sees of a finished tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Tool name.
    pub tool: String,
    /// Owning session.
    pub session_id: String,
    /// Host-assigned call id.
    pub call_id: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Raw output text.
    #[serde(default)]
    pub output: String,
    /// Structured metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// One request to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HookEvent {
    /// A new session started.
    SessionBegin {
        /// Session id.
        session_id: String,
        /// Project root the overlay layers over.
        project_path: PathBuf,
    },
    /// The host restarted and referenced an existing session.
    SessionResume {
        /// Session id.
        session_id: String,
        /// Project root the overlay layers over.
        project_path: PathBuf,
    },
    /// A session finished.
    SessionEnd {
        /// Session id.
        session_id: String,
    },
    /// A tool is about to run.
    ToolBefore(ToolInput),
    /// A tool finished.
    ToolAfter(ToolOutput),
    /// List live sessions.
    Sessions,
    /// List recorded calls for a session.
    Calls {
        /// Session id.
        session_id: String,
        /// Restrict to one tool.
        #[serde(default)]
        name: Option<String>,
        /// Rows to skip.
        #[serde(default)]
        offset: i64,
        /// Maximum rows.
        #[serde(default = "default_limit")]
        limit: i64,
    },
    /// Per-tool statistics for a session.
    Stats {
        /// Session id.
        session_id: String,
    },
    /// Key-value entries of a session's store.
    Kv {
        /// Session id.
        session_id: String,
        /// Key prefix filter.
        #[serde(default)]
        prefix: String,
    },
}
