//! Mount controller: idempotent mount/unmount with verification.
//!
//! Owns the table of background mount processes keyed by session id so they
//! can be terminated one at a time on session end, or all at once on
//! shutdown.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::session::MountInfo;
use crate::tracking::outcome::truncate_output;
use crate::{AppError, Result};

use super::{platform_supported, CommandOutput, OverlayProcess};

/// How long a terminated mount process gets to exit before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Upper bound on waiting for a failed mount process's stderr to close.
const STDERR_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Stderr lines kept for the failure message of a mount process.
const STDERR_TAIL_LINES: usize = 20;

/// Longest stderr line kept, in bytes.
const STDERR_LINE_BYTES: usize = 1024;

type StderrTail = Arc<std::sync::Mutex<VecDeque<String>>>;

/// A spawned mount process and the task reading its stderr.
///
/// Stderr is read for the whole life of the process so a chatty daemon never
/// blocks on a full pipe.
struct MountProcess {
    child: Child,
    stderr_tail: StderrTail,
    stderr_task: Option<JoinHandle<()>>,
}

impl MountProcess {
    fn new(session_id: &str, mut child: Child) -> Self {
        let stderr_tail = StderrTail::default();
        let stderr_task = child.stderr.take().map(|stderr| {
            let tail = Arc::clone(&stderr_tail);
            let session_id = session_id.to_owned();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf).await {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(err) => {
                            debug!(%session_id, %err, "mount process stderr closed");
                            break;
                        }
                    }
                    let raw = String::from_utf8_lossy(&buf);
                    let line = truncate_output(raw.trim(), STDERR_LINE_BYTES);
                    if line.is_empty() {
                        continue;
                    }
                    debug!(%session_id, %line, "mount process stderr");
                    let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.to_owned());
                }
            })
        });
        Self {
            child,
            stderr_tail,
            stderr_task,
        }
    }

    /// The last stderr lines, after giving the reader a moment to hit EOF.
    async fn stderr_tail(&mut self) -> String {
        let finished = match self.stderr_task.as_mut() {
            Some(task) => tokio::time::timeout(STDERR_READ_TIMEOUT, task).await.is_ok(),
            None => false,
        };
        if finished {
            self.stderr_task = None;
        }
        let tail = self
            .stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}

impl Drop for MountProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

/// Background mount processes keyed by session id.
type MountProcesses = Arc<Mutex<HashMap<String, MountProcess>>>;

/// Drives the external overlay program for every session.
pub struct MountController {
    overlay: Arc<dyn OverlayProcess>,
    settle: Duration,
    processes: MountProcesses,
}

impl MountController {
    /// Create a controller that waits `settle` before verifying a new mount.
    #[must_use]
    pub fn new(overlay: Arc<dyn OverlayProcess>, settle: Duration) -> Self {
        Self {
            overlay,
            settle,
            processes: MountProcesses::default(),
        }
    }

    /// Whether the host platform can present overlay mounts.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        platform_supported()
    }

    /// Mount the overlay for `info.session_id` layered over `project_root`.
    ///
    /// A no-op when `info.mounted` is already true. On success `mounted` is
    /// set, `pid` records the live mount process (absent when the launcher
    /// daemonised), and `error` is cleared. On failure `mounted` stays false
    /// and `error` holds the message.
    ///
    /// # Errors
    ///
    /// - `AppError::MountUnavailable` if the overlay program is not installed.
    /// - `AppError::MountVerificationFailed` if init fails, the mount process
    ///   exits non-zero, or the mount point does not check out.
    /// - `AppError::Io` if a process cannot be started.
    pub async fn mount(&self, info: &mut MountInfo, project_root: &Path) -> Result<()> {
        if info.mounted {
            debug!(session_id = %info.session_id, "overlay already mounted");
            return Ok(());
        }

        let span = info_span!("mount_overlay", session_id = %info.session_id);
        match self.try_mount(info, project_root).instrument(span).await {
            Ok(pid) => {
                info.mounted = true;
                info.pid = pid;
                info.error = None;
                info!(
                    session_id = %info.session_id,
                    mount_path = %info.mount_path.display(),
                    ?pid,
                    "overlay mounted"
                );
                Ok(())
            }
            Err(err) => {
                info.mounted = false;
                info.pid = None;
                info.error = Some(err.to_string());
                warn!(session_id = %info.session_id, %err, "overlay mount failed");
                Err(err)
            }
        }
    }

    async fn try_mount(&self, info: &MountInfo, project_root: &Path) -> Result<Option<u32>> {
        if !self.overlay.is_installed().await {
            return Err(AppError::MountUnavailable(
                "overlay program not found on PATH".into(),
            ));
        }

        let init = self
            .overlay
            .init(info.session_id.clone(), project_root.to_path_buf())
            .await?;
        if init.success() {
            debug!("overlay initialised");
        } else if is_already_exists(&init) {
            debug!("overlay already initialised");
        } else {
            return Err(AppError::MountVerificationFailed(format!(
                "overlay init failed: {}",
                init.failure_message()
            )));
        }

        let child = self.overlay.spawn_mount(&info.session_id, &info.mount_path)?;
        let pid = child.id();
        let process = MountProcess::new(&info.session_id, child);
        self.processes
            .lock()
            .await
            .insert(info.session_id.clone(), process);

        tokio::time::sleep(self.settle).await;

        let daemonized = match self.check_process(&info.session_id).await {
            Ok(daemonized) => daemonized,
            Err(err) => {
                self.forget_process(&info.session_id).await;
                return Err(err);
            }
        };

        if let Err(err) = self.verify_mount_point(&info.mount_path).await {
            self.forget_process(&info.session_id).await;
            return Err(err);
        }

        Ok(if daemonized { None } else { pid })
    }

    /// Inspect the tracked mount process after the settle window.
    ///
    /// Returns `Ok(true)` when the launcher exited cleanly (daemonised); the
    /// exited handle is dropped from the table.
    async fn check_process(&self, session_id: &str) -> Result<bool> {
        let mut table = self.processes.lock().await;
        let Some(process) = table.get_mut(session_id) else {
            return Err(AppError::MountVerificationFailed(
                "mount process handle lost".into(),
            ));
        };

        match process.child.try_wait() {
            Ok(None) => Ok(false),
            Ok(Some(status)) if status.success() => {
                debug!(session_id, "mount launcher exited cleanly, assuming daemonised");
                table.remove(session_id);
                Ok(true)
            }
            Ok(Some(status)) => {
                let stderr = process.stderr_tail().await;
                table.remove(session_id);
                let detail = if stderr.is_empty() {
                    status.to_string()
                } else {
                    stderr
                };
                Err(AppError::MountVerificationFailed(format!(
                    "mount process exited: {detail}"
                )))
            }
            Err(err) => {
                warn!(session_id, %err, "could not poll mount process, verifying mount point");
                Ok(false)
            }
        }
    }

    async fn verify_mount_point(&self, mount_path: &Path) -> Result<()> {
        tokio::fs::read_dir(mount_path).await.map_err(|err| {
            AppError::MountVerificationFailed(format!(
                "mount point {} not readable: {err}",
                mount_path.display()
            ))
        })?;

        match self.overlay.is_listed_mount(mount_path.to_path_buf()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::MountVerificationFailed(format!(
                "{} is not in the mount table",
                mount_path.display()
            ))),
            Err(err) => {
                warn!(%err, "mount table check unavailable, relying on accessibility");
                Ok(())
            }
        }
    }

    /// Mark an overlay left mounted by a previous broker process as live.
    ///
    /// Returns whether `info` is mounted afterwards. No process is tracked for
    /// an adopted mount.
    pub async fn adopt_existing(&self, info: &mut MountInfo) -> bool {
        if info.mounted {
            return true;
        }

        let listed = matches!(
            self.overlay
                .is_listed_mount(info.mount_path.clone())
                .await,
            Ok(true)
        );
        if listed && tokio::fs::read_dir(&info.mount_path).await.is_ok() {
            info.mounted = true;
            info.pid = None;
            info.error = None;
            info!(session_id = %info.session_id, "adopted existing overlay mount");
            return true;
        }
        false
    }

    /// Tear down the overlay for `info.session_id`. Never fails.
    ///
    /// Terminates the tracked mount process, then tries the primary and the
    /// secondary unmount command. Failures are logged and recorded on
    /// `info.error`; `mounted` and `pid` are cleared regardless.
    pub async fn unmount(&self, info: &mut MountInfo) {
        if !info.mounted {
            return;
        }

        let span = info_span!("unmount_overlay", session_id = %info.session_id);
        async {
            let process = self.processes.lock().await.remove(&info.session_id);
            if let Some(process) = process {
                terminate(&info.session_id, process).await;
            }

            let primary = self.overlay.unmount(info.mount_path.clone()).await;
            if let Some(reason) = unmount_failure(&primary) {
                debug!(%reason, "primary unmount failed, trying fallback");
                let fallback = self.overlay.force_unmount(info.mount_path.clone()).await;
                if let Some(fallback_reason) = unmount_failure(&fallback) {
                    warn!(
                        primary = %reason,
                        fallback = %fallback_reason,
                        "overlay unmount failed"
                    );
                    info.error = Some(format!("unmount failed: {fallback_reason}"));
                }
            }
        }
        .instrument(span)
        .await;

        info.mounted = false;
        info.pid = None;
        info!(session_id = %info.session_id, "overlay unmounted");
    }

    /// Terminate every tracked mount process. Returns how many were tracked.
    pub async fn terminate_all(&self) -> usize {
        let drained: Vec<(String, MountProcess)> = self.processes.lock().await.drain().collect();
        let count = drained.len();
        join_all(
            drained
                .into_iter()
                .map(|(session_id, process)| async move { terminate(&session_id, process).await }),
        )
        .await;
        if count > 0 {
            info!(count, "terminated all overlay mount processes");
        }
        count
    }

    /// Whether a mount process is tracked for `session_id`.
    pub async fn is_tracked(&self, session_id: &str) -> bool {
        self.processes.lock().await.contains_key(session_id)
    }

    async fn forget_process(&self, session_id: &str) {
        let process = self.processes.lock().await.remove(session_id);
        if let Some(process) = process {
            terminate(session_id, process).await;
        }
    }
}

fn is_already_exists(output: &CommandOutput) -> bool {
    let text = format!("{}\n{}", output.stderr, output.stdout).to_ascii_lowercase();
    text.contains("already exists")
}

fn unmount_failure(result: &Result<CommandOutput>) -> Option<String> {
    match result {
        Ok(out) if out.success() => None,
        Ok(out) => Some(out.failure_message()),
        Err(err) => Some(err.to_string()),
    }
}

/// Ask a mount process to stop, then kill it if it lingers.
async fn terminate(session_id: &str, mut process: MountProcess) {
    let child = &mut process.child;
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                debug!(session_id, %err, "SIGTERM to mount process failed");
            }
        }
    }

    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(session_id, %status, "mount process exited"),
        Ok(Err(err)) => warn!(session_id, %err, "error waiting for mount process"),
        Err(_) => {
            warn!(session_id, "mount process ignored SIGTERM, killing");
            if let Err(err) = child.kill().await {
                warn!(session_id, %err, "failed to kill mount process");
            }
        }
    }
}
