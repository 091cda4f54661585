//! Call-log records for tracked tool invocations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status for a call-log row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Invocation started, completion not yet processed.
    Pending,
    /// Completed successfully.
    Success,
    /// Completed with an error.
    Error,
}

impl ToolCallStatus {
    /// Column value stored in `tool_calls.status`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One call-log row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCall {
    /// Store-assigned record identifier.
    pub id: i64,
    /// Tool name.
    pub name: String,
    /// Arguments as supplied by the agent.
    pub parameters: Option<Value>,
    /// Success payload (`title`, `output`, `metadata`).
    pub result: Option<Value>,
    /// Error text for failed calls.
    pub error: Option<String>,
    /// Current status.
    pub status: ToolCallStatus,
    /// Start time, epoch milliseconds.
    pub started_at: i64,
    /// Completion time, epoch milliseconds.
    pub completed_at: Option<i64>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: Option<i64>,
}

/// A complete row written in one shot when no pending row exists.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Tool name.
    pub name: String,
    /// Start time, epoch milliseconds.
    pub started_at: i64,
    /// Completion time, epoch milliseconds.
    pub completed_at: i64,
    /// Arguments as supplied by the agent.
    pub parameters: Value,
    /// Success payload, if the call succeeded.
    pub result: Option<Value>,
    /// Error text, if the call failed.
    pub error: Option<String>,
}

/// Per-tool aggregate over the call log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ToolCallStats {
    /// Tool name.
    pub name: String,
    /// Rows recorded for the tool.
    pub total: i64,
    /// Rows that completed successfully.
    pub successful: i64,
    /// Rows that completed with an error.
    pub failed: i64,
    /// Mean duration over completed rows.
    pub avg_duration_ms: f64,
}
