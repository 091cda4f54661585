//! Success/error classification of tool output.
//!
//! Output is sometimes structured JSON and sometimes plain text. JSON with a
//! non-empty `error` field is an error; text that fails to parse is an error
//! only if it starts with an `Error:` or `error:` marker. A success payload
//! that merely mentions the word "error" is still a success.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// What the after-hook hands the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Raw tool output.
    #[serde(default)]
    pub output: String,
    /// Structured metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// Result of classifying a [`ToolOutcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The tool succeeded.
    Success,
    /// The tool failed with this message.
    Error(String),
}

/// Classify raw tool output.
#[must_use]
pub fn classify(output: &str) -> Classification {
    match serde_json::from_str::<Value>(output) {
        Ok(value) => match value.get("error") {
            None | Some(Value::Null | Value::Bool(false)) => Classification::Success,
            Some(Value::String(msg)) if msg.is_empty() => Classification::Success,
            Some(Value::String(msg)) => Classification::Error(msg.clone()),
            Some(other) => Classification::Error(other.to_string()),
        },
        Err(_) if output.starts_with("Error:") || output.starts_with("error:") => {
            Classification::Error(output.to_owned())
        }
        Err(_) => Classification::Success,
    }
}

/// Cut `text` to at most `max_bytes`, on a character boundary.
#[must_use]
pub fn truncate_output(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

impl ToolOutcome {
    /// Success payload stored on the call-log row.
    #[must_use]
    pub fn success_payload(&self, max_output_bytes: usize) -> Value {
        json!({
            "title": self.title,
            "output": truncate_output(&self.output, max_output_bytes),
            "metadata": self.metadata,
        })
    }
}
