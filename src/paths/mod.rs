//! Path translation between a session's project and mount namespaces.
//!
//! Tools run against the overlay mount while the agent only ever sees project
//! paths. Requests are rewritten project→mount before execution and results
//! mount→project afterwards. Every function here is total: unmatched input is
//! returned unchanged.

pub mod rewrite;
pub mod translate;

pub use rewrite::{marker_suffix, rewrite_in_string, rewrite_relative_output};
pub use translate::{is_within, normalize, to_mount_path, to_project_path};
