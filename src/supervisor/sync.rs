//! Synchronizer: the local daemon keeping a work-dir in sync with the dev
//! pod. The Engine treats it as opaque beyond `start`/`wait_ready`/`stop`.

use std::time::{Duration, Instant};

use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};

use super::{Error, Result};

/// Mirrors the manifest's work-dir plus the target pod, enough for the
/// synchronizer binary to know what to replicate and where.
#[derive(Clone, Debug)]
pub struct MountSpec {
    pub namespace: String,
    pub pod_name: String,
    pub container: String,
    pub local_path: String,
    pub remote_path: String,
}

/// A running synchronizer child process.
pub struct SyncHandle {
    child: Child,
    restarted_at: Vec<Instant>,
}

const MAX_RESTARTS: usize = 3;
const RESTART_WINDOW: Duration = Duration::from_secs(60);
const READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Binary name for the local sync daemon. Resolved off `$PATH`.
const SYNCD_BIN: &str = "devctl-syncd";

pub struct Synchronizer;

impl Synchronizer {
    /// Spawns the synchronizer against `mount`, returning immediately —
    /// callers must follow with [`Self::wait_ready`].
    pub fn start(mount: &MountSpec) -> Result<SyncHandle> {
        let child = spawn(mount)?;
        Ok(SyncHandle { child, restarted_at: Vec::new() })
    }

    /// Blocks until the synchronizer reports an initial handshake by
    /// writing a `ready` line to its stdout, or `READY_TIMEOUT` elapses.
    pub async fn wait_ready(handle: &mut SyncHandle) -> Result<()> {
        let stdout = handle
            .child
            .stdout
            .take()
            .ok_or_else(|| Error::SynchronizerFailed("no stdout pipe".to_string()))?;
        let mut lines = tokio::io::BufReader::new(stdout).lines();

        let result = tokio::time::timeout(READY_TIMEOUT, async {
            while let Some(line) = lines.next_line().await.map_err(Error::Io)? {
                if line.trim() == "ready" {
                    return Ok(());
                }
            }
            Err(Error::SynchronizerFailed("synchronizer exited before handshake".to_string()))
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::SynchronizerFailed("timed out waiting for sync handshake".to_string())),
        }
    }

    /// Restarts the synchronizer in place, enforcing the restart-window
    /// policy. Returns [`Error::RestartsExhausted`] once `K` restarts have
    /// happened within the window.
    pub fn restart(handle: &mut SyncHandle, mount: &MountSpec) -> Result<()> {
        let now = Instant::now();
        handle.restarted_at.retain(|t| now.duration_since(*t) < RESTART_WINDOW);

        if handle.restarted_at.len() >= MAX_RESTARTS {
            return Err(Error::RestartsExhausted);
        }

        handle.restarted_at.push(now);
        handle.child = spawn(mount)?;
        Ok(())
    }

    pub async fn stop(mut handle: SyncHandle) -> Result<()> {
        let _ = handle.child.start_kill();
        let _ = handle.child.wait().await;
        Ok(())
    }

    /// Non-blocking liveness check, used by the Engine's `Running` loop to
    /// detect an unexpected exit that should trigger [`Self::restart`].
    pub fn has_exited(handle: &mut SyncHandle) -> bool {
        matches!(handle.child.try_wait(), Ok(Some(_)))
    }
}

fn spawn(mount: &MountSpec) -> Result<Child> {
    Command::new(SYNCD_BIN)
        .arg("--namespace").arg(&mount.namespace)
        .arg("--pod").arg(&mount.pod_name)
        .arg("--container").arg(&mount.container)
        .arg("--local").arg(&mount.local_path)
        .arg("--remote").arg(&mount.remote_path)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::Io)
}
