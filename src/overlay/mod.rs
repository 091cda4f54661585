//! External overlay program contract and mount orchestration.
//!
//! The overlay filesystem itself lives in a separate program. The broker only
//! needs to initialise a session's overlay, start the long-running mount
//! process, check the result, and tear it down again.

pub mod cli;
pub mod controller;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::process::Child;

use crate::Result;

pub use cli::AgentFsCli;
pub use controller::MountController;

/// Boxed future returned by [`OverlayProcess`] methods.
pub type OverlayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Exit code and captured streams of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best human-readable failure text: stderr, else stdout, else the code.
    #[must_use]
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_owned();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_owned();
        }
        self.code.map_or_else(
            || "terminated by signal".to_owned(),
            |c| format!("exited with code {c}"),
        )
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Operations the mount controller needs from the overlay program and the OS.
///
/// Methods take owned arguments so implementations can move them into the
/// returned future.
pub trait OverlayProcess: Send + Sync {
    /// Whether the overlay program can be found.
    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Initialise the overlay for `session_id` layered over `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the program cannot be run at all.
    fn init(&self, session_id: String, base_dir: PathBuf) -> OverlayFuture<'_, CommandOutput>;

    /// Start the long-running mount process presenting the overlay at `mount_dir`.
    ///
    /// The returned child must have its stderr piped so a failed start can be
    /// reported.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the process cannot be spawned.
    fn spawn_mount(&self, session_id: &str, mount_dir: &Path) -> Result<Child>;

    /// Primary OS unmount command.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the command cannot be run.
    fn unmount(&self, mount_dir: PathBuf) -> OverlayFuture<'_, CommandOutput>;

    /// Secondary, platform-specific unmount command.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the command cannot be run.
    fn force_unmount(&self, mount_dir: PathBuf) -> OverlayFuture<'_, CommandOutput>;

    /// Whether the live mount table lists `mount_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when the mount table itself cannot be read; callers
    /// treat that as "unknown", not as "not mounted".
    fn is_listed_mount(&self, mount_dir: PathBuf) -> OverlayFuture<'_, bool>;
}

/// Whether this platform can present FUSE overlays at all.
#[must_use]
pub fn platform_supported() -> bool {
    cfg!(any(target_os = "linux", target_os = "macos"))
}
