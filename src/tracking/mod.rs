//! Tool-call tracking.
//!
//! Tracking is diagnostic: nothing in this module ever fails the tool call it
//! observes.

pub mod outcome;
pub mod policy;
pub mod tracker;

pub use outcome::{classify, Classification, ToolOutcome};
pub use policy::TrackingPolicy;
pub use tracker::{CallKey, CallTracker};
