//! Broker wiring and the run-once shutdown entry point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::GlobalConfig;
use crate::hooks::HookAdapter;
use crate::overlay::{AgentFsCli, MountController, OverlayProcess};
use crate::registry::SessionRegistry;
use crate::tracking::CallTracker;

/// Every long-lived component of the broker, owned in one place.
pub struct Broker {
    config: Arc<GlobalConfig>,
    controller: Arc<MountController>,
    registry: Arc<SessionRegistry>,
    tracker: Arc<CallTracker>,
    hooks: Arc<HookAdapter>,
    shut_down: AtomicBool,
}

impl Broker {
    /// Build a broker driving the configured overlay program.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        let overlay = Arc::new(AgentFsCli::from_config(&config));
        Self::with_overlay(config, overlay)
    }

    /// Build a broker around a specific overlay process implementation.
    #[must_use]
    pub fn with_overlay(config: GlobalConfig, overlay: Arc<dyn OverlayProcess>) -> Self {
        let config = Arc::new(config);
        let controller = Arc::new(MountController::new(
            overlay,
            Duration::from_millis(config.overlay.settle_ms),
        ));
        let registry = Arc::new(SessionRegistry::new(
            Arc::clone(&config),
            Arc::clone(&controller),
        ));
        let tracker = Arc::new(CallTracker::from_config(&config.tracking));
        let hooks = Arc::new(HookAdapter::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
        ));

        Self {
            config,
            controller,
            registry,
            tracker,
            hooks,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<GlobalConfig> {
        &self.config
    }

    /// Session registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Call tracker.
    #[must_use]
    pub fn tracker(&self) -> &Arc<CallTracker> {
        &self.tracker
    }

    /// Hook adapter serving host events.
    #[must_use]
    pub fn hooks(&self) -> &Arc<HookAdapter> {
        &self.hooks
    }

    /// End every session and terminate every tracked mount process.
    ///
    /// Runs at most once; later calls return `false` immediately.
    pub async fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        let ended = self.registry.end_all().await;
        let terminated = self.controller.terminate_all().await;
        info!(ended, terminated, "broker shut down");
        true
    }

    /// Whether [`Broker::shutdown`] has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
