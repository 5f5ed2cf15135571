//! Isolation processes anchoring a private network namespace
//!
//! The anchor is an otherwise idle child that calls unshare(2) before exec,
//! so `/proc/<pid>/ns/net` names a fresh namespace for as long as it lives.
//! The orchestrator's own thread never unshares.

#![allow(unsafe_code)]

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use cnibench_core::{Error, ProcessId, Result};
use nix::errno::Errno;
use nix::sched::{unshare, CloneFlags};
use nix::sys::signal::{kill, Signal};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// How long to wait for the child after SIGKILL
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// A running child whose network namespace is private
#[async_trait]
pub trait IsolationProcess: Send + std::fmt::Debug {
    /// Process id
    fn pid(&self) -> ProcessId;

    /// `/proc/<pid>/ns/net`
    fn netns_path(&self) -> PathBuf {
        self.pid().netns_path()
    }

    /// Whether `terminate` has not completed yet
    fn is_running(&self) -> bool;

    /// Stop the process; safe to call on an exited process and more than once
    ///
    /// # Errors
    /// Returns [`Error::TerminateFailed`] if the process cannot be reaped in time
    async fn terminate(&mut self) -> Result<()>;
}

/// Starts isolation processes
///
/// This allows for different implementations:
/// - [`UnshareSpawner`] - real children in a new network namespace
/// - [`MockSpawner`](crate::MockSpawner) - bookkeeping only, for tests
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Launch a new isolation process
    ///
    /// # Errors
    /// Returns [`Error::SpawnFailed`] if the process cannot be started
    async fn spawn(&self) -> Result<Box<dyn IsolationProcess>>;
}

/// Spawns the anchor command with `CLONE_NEWNET` unshared
#[derive(Debug, Clone)]
pub struct UnshareSpawner {
    command: Vec<String>,
    grace: Duration,
}

impl UnshareSpawner {
    /// Create a spawner for `command` (program followed by arguments)
    ///
    /// # Errors
    /// Returns error if the command is empty
    pub fn new(command: Vec<String>, grace: Duration) -> Result<Self> {
        if command.first().is_none_or(String::is_empty) {
            return Err(Error::InvalidConfig {
                message: "Anchor command cannot be empty".to_string(),
            });
        }

        Ok(Self { command, grace })
    }

    /// Command line as logged and reported
    #[must_use]
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

#[async_trait]
impl ProcessSpawner for UnshareSpawner {
    async fn spawn(&self) -> Result<Box<dyn IsolationProcess>> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::InvalidConfig {
                message: "Anchor command cannot be empty".to_string(),
            })?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        // SAFETY: unshare(2) is async-signal-safe and only touches the child.
        unsafe {
            command.pre_exec(|| unshare(CloneFlags::CLONE_NEWNET).map_err(std::io::Error::from));
        }

        let child = command.spawn().map_err(|source| Error::SpawnFailed {
            command: self.command_line(),
            source,
        })?;

        let raw = child.id().ok_or_else(|| Error::SpawnFailed {
            command: self.command_line(),
            source: std::io::Error::other("child exited before reporting a pid"),
        })?;
        let pid = ProcessId::from_raw(i32::try_from(raw).map_err(|e| Error::SpawnFailed {
            command: self.command_line(),
            source: std::io::Error::other(e),
        })?);

        debug!(pid = %pid, command = %self.command_line(), "Spawned netns process");

        Ok(Box::new(UnsharedProcess {
            pid,
            child: Some(child),
            grace: self.grace,
        }))
    }
}

/// Child process holding an unshared network namespace
#[derive(Debug)]
pub struct UnsharedProcess {
    pid: ProcessId,
    child: Option<Child>,
    grace: Duration,
}

impl UnsharedProcess {
    async fn reap(&self, child: &mut Child, within: Duration) -> Result<bool> {
        match timeout(within, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid = %self.pid, status = %status, "Netns process exited");
                Ok(true)
            }
            Ok(Err(e)) => Err(Error::TerminateFailed {
                pid: self.pid,
                message: format!("wait failed: {e}"),
            }),
            Err(_) => Ok(false),
        }
    }
}

#[async_trait]
impl IsolationProcess for UnsharedProcess {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn is_running(&self) -> bool {
        self.child.is_some()
    }

    async fn terminate(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!(pid = %self.pid, status = %status, "Netns process already exited");
            return Ok(());
        }

        match kill(self.pid.as_nix_pid(), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pid = %self.pid, error = %e, "SIGTERM failed, escalating"),
        }

        if self.reap(&mut child, self.grace).await? {
            return Ok(());
        }

        info!(pid = %self.pid, grace_ms = self.grace.as_millis(), "Netns process ignored SIGTERM, killing");
        child.start_kill().map_err(|e| Error::TerminateFailed {
            pid: self.pid,
            message: format!("SIGKILL failed: {e}"),
        })?;

        if self.reap(&mut child, KILL_TIMEOUT).await? {
            Ok(())
        } else {
            Err(Error::TerminateFailed {
                pid: self.pid,
                message: format!("still running {KILL_TIMEOUT:?} after SIGKILL"),
            })
        }
    }
}

impl Drop for UnsharedProcess {
    /// Fallback cleanup (if terminate wasn't called)
    fn drop(&mut self) {
        if self.child.is_some() {
            // kill_on_drop sends SIGKILL when the child handle goes away
            warn!(pid = %self.pid, "Netns process not explicitly terminated, killing on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(UnshareSpawner::new(Vec::new(), Duration::from_millis(10)).is_err());
        assert!(UnshareSpawner::new(vec![String::new()], Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_command_line() {
        let spawner = UnshareSpawner::new(
            vec!["sleep".to_string(), "30".to_string()],
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(spawner.command_line(), "sleep 30");
    }
}
