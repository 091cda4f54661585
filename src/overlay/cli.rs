//! `agentfs`-style overlay CLI driven through `tokio::process`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::GlobalConfig;
use crate::{AppError, Result};

use super::{CommandOutput, OverlayFuture, OverlayProcess};

/// Linux mount table.
#[cfg(target_os = "linux")]
const MOUNT_TABLE: &str = "/proc/self/mounts";

/// Overlay program invoked as `<program> init|mount ...`.
///
/// Commands run with the store directory as their working directory so the
/// program places each session's store file where the broker expects it.
#[derive(Debug, Clone)]
pub struct AgentFsCli {
    program: String,
    work_dir: PathBuf,
}

impl AgentFsCli {
    /// Create a CLI wrapper for `program`, run from `work_dir`.
    #[must_use]
    pub fn new(program: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Build from the `[overlay]` and `[store]` configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(config.overlay.program.clone(), config.store.dir.clone())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        cmd
    }
}

/// Run a command to completion, capturing both streams.
async fn run(mut cmd: Command, label: &str) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    let output = cmd
        .output()
        .await
        .map_err(|err| AppError::Io(format!("failed to run {label}: {err}")))?;
    let output = CommandOutput::from(output);
    debug!(label, code = ?output.code, "command finished");
    Ok(output)
}

impl OverlayProcess for AgentFsCli {
    fn is_installed(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async move {
            let mut cmd = Command::new("which");
            cmd.arg(&self.program);
            run(cmd, "which").await.is_ok_and(|out| out.success())
        })
    }

    fn init(&self, session_id: String, base_dir: PathBuf) -> OverlayFuture<'_, CommandOutput> {
        Box::pin(async move {
            let mut cmd = self.command();
            cmd.arg("init").arg(&session_id).arg("--base").arg(&base_dir);
            run(cmd, "overlay init").await
        })
    }

    fn spawn_mount(&self, session_id: &str, mount_dir: &Path) -> Result<Child> {
        let mut cmd = self.command();
        cmd.arg("mount")
            .arg(session_id)
            .arg(mount_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.spawn()
            .map_err(|err| AppError::Io(format!("failed to spawn overlay mount: {err}")))
    }

    fn unmount(&self, mount_dir: PathBuf) -> OverlayFuture<'_, CommandOutput> {
        Box::pin(async move {
            let cmd = if cfg!(target_os = "linux") {
                let mut cmd = Command::new("fusermount");
                cmd.arg("-u").arg(&mount_dir);
                cmd
            } else {
                let mut cmd = Command::new("umount");
                cmd.arg(&mount_dir);
                cmd
            };
            run(cmd, "unmount").await
        })
    }

    fn force_unmount(&self, mount_dir: PathBuf) -> OverlayFuture<'_, CommandOutput> {
        Box::pin(async move {
            let cmd = if cfg!(target_os = "macos") {
                let mut cmd = Command::new("diskutil");
                cmd.args(["unmount", "force"]).arg(&mount_dir);
                cmd
            } else {
                let mut cmd = Command::new("umount");
                cmd.arg("-l").arg(&mount_dir);
                cmd
            };
            run(cmd, "force unmount").await
        })
    }

    fn is_listed_mount(&self, mount_dir: PathBuf) -> OverlayFuture<'_, bool> {
        Box::pin(async move {
            let table = read_mount_table().await?;
            Ok(mount_table_lists(&table, &mount_dir))
        })
    }
}

#[cfg(target_os = "linux")]
async fn read_mount_table() -> Result<String> {
    tokio::fs::read_to_string(MOUNT_TABLE)
        .await
        .map_err(|err| AppError::Io(format!("cannot read {MOUNT_TABLE}: {err}")))
}

#[cfg(not(target_os = "linux"))]
async fn read_mount_table() -> Result<String> {
    let output = run(Command::new("mount"), "mount").await?;
    if output.success() {
        Ok(output.stdout)
    } else {
        Err(AppError::Io(format!(
            "mount table unavailable: {}",
            output.failure_message()
        )))
    }
}

/// Whether any line of a mount table names `mount_dir` as a mount point.
///
/// Handles both `/proc/self/mounts` (`src target type ...`) and BSD `mount`
/// output (`src on target (type, ...)`).
#[must_use]
pub fn mount_table_lists(table: &str, mount_dir: &Path) -> bool {
    let target = mount_dir.to_string_lossy();
    let escaped = target.replace(' ', "\\040");
    table.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let second = fields.nth(1);
        let third = fields.next();
        second == Some(escaped.as_str())
            || (second == Some("on") && third == Some(&*target))
            || line.contains(&format!(" on {target} ("))
    })
}
