//! External performance-counter sampler control.
//!
//! The sampler is a separate OS process (conventionally `perf stat -p <pid>`)
//! attached to a worker container's main process from outside the container.
//! It is launched into its own process group so that it, and any child it
//! forks, can be signalled independently of the controller's own process
//! group.

use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{ControllerError, Result};

pub struct SamplerHandle {
    child: Child,
    pgid: i32,
    report_path: PathBuf,
}

impl SamplerHandle {
    pub fn report_path(&self) -> &Path {
        &self.report_path
    }
}

/// Launch an external sampler attached to `pid`, sampling `events` (a
/// comma-separated counter list) and writing its report to `path`.
pub async fn launch(sampler_bin: &str, pid: u32, events: &str, path: &Path) -> Result<SamplerHandle> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut child = Command::new(sampler_bin)
        .arg("stat")
        .arg("-e")
        .arg(events)
        .arg("-p")
        .arg(pid.to_string())
        .arg("-o")
        .arg(path)
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ControllerError::SamplerError(format!("failed to spawn sampler: {e}")))?;

    let pgid = child
        .id()
        .ok_or_else(|| ControllerError::SamplerError("sampler exited immediately".into()))? as i32;

    debug!("launched sampler pid/pgid {} -> {}", pgid, path.display());

    Ok(SamplerHandle {
        child,
        pgid,
        report_path: path.to_path_buf(),
    })
}

/// Stop a running sampler: interrupt its process group, wait up to `grace`
/// for it to exit on its own, then forcibly kill the group.
pub async fn stop(mut handle: SamplerHandle, grace: Duration) -> Result<()> {
    let group = Pid::from_raw(-handle.pgid);

    if let Err(e) = signal::kill(group, Signal::SIGINT) {
        warn!("failed to interrupt sampler process group {}: {}", handle.pgid, e);
    }

    match tokio::time::timeout(grace, handle.child.wait()).await {
        Ok(Ok(status)) => {
            debug!("sampler {} exited with {}", handle.pgid, status);
        }
        Ok(Err(e)) => {
            warn!("error waiting for sampler {}: {}", handle.pgid, e);
        }
        Err(_) => {
            warn!("sampler {} did not exit within grace period, killing", handle.pgid);
            if let Err(e) = signal::kill(group, Signal::SIGKILL) {
                warn!("failed to kill sampler process group {}: {}", handle.pgid, e);
            }
            let _ = handle.child.wait().await;
        }
    }

    Ok(())
}

/// Whether the sampler process is still alive.
pub fn is_running(handle: &mut SamplerHandle) -> bool {
    matches!(handle.child.try_wait(), Ok(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launch_missing_binary_is_a_sampler_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        let result = launch("definitely-not-a-real-sampler-binary", 1, "cycles", &path).await;
        assert!(result.is_err());
    }
}
