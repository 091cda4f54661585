//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

fn default_ipc_name() -> String {
    "overlay-broker".into()
}

/// Session store settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct StoreConfig {
    /// Directory holding one `<session_id>.db` file per session.
    pub dir: PathBuf,
    /// `SQLite` busy timeout applied to every store connection.
    pub busy_timeout_ms: u64,
    /// Attempts made to open a locked store before giving up.
    pub retry_attempts: u32,
    /// First backoff delay; doubled after every busy failure.
    pub retry_base_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".agentfs"),
            busy_timeout_ms: 5000,
            retry_attempts: 5,
            retry_base_delay_ms: 50,
        }
    }
}

/// External overlay program settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct OverlayConfig {
    /// Overlay CLI binary name or path.
    pub program: String,
    /// Parent directory of the per-session mount points.
    pub mount_base_dir: PathBuf,
    /// Mount the overlay automatically when a session begins.
    pub auto_mount: bool,
    /// Delay between spawning the mount process and verifying it.
    pub settle_ms: u64,
    /// Leave the store handle to the overlay process while mounted and open
    /// it lazily on first use.
    pub defer_store_when_mounted: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            program: "agentfs".into(),
            mount_base_dir: env::temp_dir().join("agentfs-mounts"),
            auto_mount: true,
            settle_ms: 1000,
            defer_store_when_mounted: false,
        }
    }
}

/// Tool-call tracking settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TrackingConfig {
    /// Master switch for the call log.
    pub enabled: bool,
    /// Track every tool; when false only `include_tools` are tracked.
    pub track_all: bool,
    /// Tools tracked when `track_all` is off.
    pub include_tools: Vec<String>,
    /// Tools never tracked, regardless of the other settings.
    pub exclude_tools: Vec<String>,
    /// Cap on the stored size of a tool's output.
    pub max_output_bytes: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            track_all: true,
            include_tools: ["bash", "read", "write", "edit", "patch", "glob", "grep", "list"]
                .into_iter()
                .map(String::from)
                .collect(),
            exclude_tools: Vec::new(),
            max_output_bytes: 10_000,
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Session store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Overlay program settings.
    #[serde(default)]
    pub overlay: OverlayConfig,
    /// Call tracking settings.
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ipc_name: default_ipc_name(),
            store: StoreConfig::default(),
            overlay: OverlayConfig::default(),
            tracking: TrackingConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Mount point for a session's overlay.
    #[must_use]
    pub fn mount_path(&self, session_id: &str) -> PathBuf {
        self.overlay.mount_base_dir.join(session_id)
    }

    /// Store file for a session.
    #[must_use]
    pub fn store_path(&self, session_id: &str) -> PathBuf {
        self.store.dir.join(format!("{session_id}.db"))
    }

    fn validate(&mut self) -> Result<()> {
        if self.store.retry_attempts == 0 {
            return Err(AppError::Config(
                "store.retry_attempts must be greater than zero".into(),
            ));
        }

        if self.tracking.max_output_bytes == 0 {
            return Err(AppError::Config(
                "tracking.max_output_bytes must be greater than zero".into(),
            ));
        }

        if self.overlay.program.trim().is_empty() {
            return Err(AppError::Config("overlay.program must not be empty".into()));
        }

        self.store.dir = absolutize(&self.store.dir)?;
        self.overlay.mount_base_dir = absolutize(&self.overlay.mount_base_dir)?;
        Ok(())
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir()
        .map_err(|err| AppError::Config(format!("cannot resolve working directory: {err}")))?;
    Ok(cwd.join(path))
}
