//! Which tools are recorded in the call log.

use std::collections::HashSet;

use crate::config::TrackingConfig;

/// Static inclusion policy plus a per-name exclusion list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingPolicy {
    enabled: bool,
    track_all: bool,
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl TrackingPolicy {
    /// Build the policy from the `[tracking]` configuration.
    #[must_use]
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            enabled: config.enabled,
            track_all: config.track_all,
            include: config.include_tools.iter().cloned().collect(),
            exclude: config.exclude_tools.iter().cloned().collect(),
        }
    }

    /// A policy that never tracks anything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            track_all: false,
            include: HashSet::new(),
            exclude: HashSet::new(),
        }
    }

    /// Whether calls to `tool` are recorded.
    #[must_use]
    pub fn should_track(&self, tool: &str) -> bool {
        self.enabled
            && !self.exclude.contains(tool)
            && (self.track_all || self.include.contains(tool))
    }

    /// Whether `tool` is explicitly excluded.
    #[must_use]
    pub fn is_excluded(&self, tool: &str) -> bool {
        self.exclude.contains(tool)
    }
}
