//! Owns the external long-running children used while a Session is
//! `Running`: the file synchronizer and the port-forward multiplexer.

mod cleaner;
mod forward;
mod sync;

pub use cleaner::clean;
pub use forward::Multiplexer;
pub use sync::{MountSpec, SyncHandle, Synchronizer};

use crate::manifest::Forward;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("synchronizer failed: {0}")]
    SynchronizerFailed(String),

    #[error("port-forward multiplexer failed: {0}")]
    MultiplexerFailed(String),

    #[error("cleaner failed: {0}")]
    CleanerFailed(String),

    #[error("synchronizer exhausted its restart budget")]
    RestartsExhausted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Drives the synchronizer and multiplexer for one Session.
pub struct Supervisor {
    sync_handle: Option<SyncHandle>,
    multiplexer: Option<Multiplexer>,
    mount: Option<MountSpec>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self { sync_handle: None, multiplexer: None, mount: None }
    }

    /// Spawns the synchronizer; the caller is responsible for following up
    /// with [`Synchronizer::wait_ready`] via [`Self::sync_handle_mut`].
    pub fn start_sync(&mut self, mount: &MountSpec) -> Result<()> {
        self.sync_handle = Some(Synchronizer::start(mount)?);
        self.mount = Some(mount.clone());
        Ok(())
    }

    pub fn sync_handle_mut(&mut self) -> Option<&mut SyncHandle> {
        self.sync_handle.as_mut()
    }

    /// Liveness check for the `Running` state's monitoring loop: restarts
    /// the synchronizer if it exited unexpectedly, enforcing the
    /// restart-window policy. Returns `Ok(true)` if a restart happened,
    /// `Ok(false)` if the synchronizer is still alive (or not started), and
    /// `Err(Error::RestartsExhausted)` once the policy's budget is spent —
    /// the caller escalates that to a fatal Session failure.
    pub fn check_sync(&mut self) -> Result<bool> {
        let Some(handle) = self.sync_handle.as_mut() else {
            return Ok(false);
        };
        if !Synchronizer::has_exited(handle) {
            return Ok(false);
        }

        let mount = self.mount.clone().expect("mount set alongside sync_handle");
        tracing::warn!("synchronizer exited unexpectedly, restarting");
        Synchronizer::restart(handle, &mount)?;
        Ok(true)
    }

    pub async fn start_forwards(&mut self, client: kube::Client, namespace: &str, pod_name: &str, forwards: &[Forward]) -> Result<()> {
        let mut multiplexer = Multiplexer::new(client, namespace, pod_name);
        multiplexer.start(forwards).await?;
        self.multiplexer = Some(multiplexer);
        Ok(())
    }

    /// Strict teardown order: stop accepting connections and drain tunnels
    /// before stopping the synchronizer, which may take longer draining an
    /// outstanding delta.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(multiplexer) = self.multiplexer.take() {
            multiplexer.stop().await?;
        }
        if let Some(handle) = self.sync_handle.take() {
            Synchronizer::stop(handle).await?;
        }
        Ok(())
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
