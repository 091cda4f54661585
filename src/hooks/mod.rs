//! Host hook adapters.
//!
//! Maps the host's lifecycle and tool events onto the session registry, the
//! path translator, and the call tracker.

pub mod adapter;
pub mod event;

pub use adapter::HookAdapter;
pub use event::{HookEvent, ToolInput, ToolOutput};
