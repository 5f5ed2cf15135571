//! Network namespace handles
//!
//! A [`NamespaceHandle`] is an open reference to a `/proc/.../ns/net` file.
//! Holding the file keeps the namespace reachable; switching the calling
//! thread into it is `setns(2)`. Handles are released exactly once, either
//! explicitly or on drop.

use std::fmt;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use cnibench_core::{Error, ProcessId, Result};
use nix::sched::{setns, CloneFlags};
use tracing::{debug, trace};

/// Namespace reference of the calling thread
pub const THREAD_SELF_NETNS: &str = "/proc/thread-self/ns/net";

/// Kernel identity of a namespace (`st_dev`, `st_ino` of its nsfs inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId {
    dev: u64,
    ino: u64,
}

impl NamespaceId {
    /// Create from raw device and inode numbers
    #[must_use]
    pub const fn from_raw(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    /// Read the identity of the namespace a path refers to
    ///
    /// # Errors
    /// Returns error if the path cannot be stat'ed
    pub fn of_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self::from_raw(meta.dev(), meta.ino()))
    }

    /// Identity of the calling thread's current network namespace
    ///
    /// # Errors
    /// Returns error if `/proc/thread-self` is unavailable
    pub fn of_current_thread() -> Result<Self> {
        Self::of_path(THREAD_SELF_NETNS).map_err(|source| Error::NamespaceUnavailable { source })
    }

    /// Inode number, as shown by `readlink /proc/<pid>/ns/net`
    #[must_use]
    pub const fn inode(self) -> u64 {
        self.ino
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net:[{}]", self.ino)
    }
}

enum Backing {
    Open(File),
    /// Identity only, no kernel reference (mock collaborators)
    Virtual,
    Released,
}

/// Open reference to a network namespace
pub struct NamespaceHandle {
    id: NamespaceId,
    origin: PathBuf,
    backing: Backing,
}

impl NamespaceHandle {
    /// Open the namespace at `path`
    ///
    /// # Errors
    /// Returns the I/O error if the path cannot be opened
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let origin = path.into();
        // std opens with O_CLOEXEC, so plugin children never inherit the fd
        let file = File::open(&origin)?;
        let meta = file.metadata()?;

        trace!(path = %origin.display(), ino = meta.ino(), "Opened netns handle");

        Ok(Self {
            id: NamespaceId::from_raw(meta.dev(), meta.ino()),
            origin,
            backing: Backing::Open(file),
        })
    }

    /// Capture the calling thread's current namespace
    ///
    /// The caller must stay on this OS thread for as long as the handle is
    /// meant to describe "where this thread came from".
    ///
    /// # Errors
    /// Returns [`Error::NamespaceUnavailable`]
    pub fn current() -> Result<Self> {
        Self::open(THREAD_SELF_NETNS).map_err(|source| Error::NamespaceUnavailable { source })
    }

    /// Open the namespace of a running process
    ///
    /// # Errors
    /// Returns [`Error::ProcessNamespaceUnavailable`] if the process is gone
    pub fn from_process(pid: ProcessId) -> Result<Self> {
        Self::open(pid.netns_path())
            .map_err(|source| Error::ProcessNamespaceUnavailable { pid, source })
    }

    /// Handle carrying only an identity, for collaborators without a kernel
    #[must_use]
    pub fn detached(id: NamespaceId, origin: impl Into<PathBuf>) -> Self {
        Self {
            id,
            origin: origin.into(),
            backing: Backing::Virtual,
        }
    }

    /// Namespace identity
    #[must_use]
    pub const fn id(&self) -> NamespaceId {
        self.id
    }

    /// Path the handle was opened from
    #[must_use]
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Whether the handle has been released
    #[must_use]
    pub const fn is_released(&self) -> bool {
        matches!(self.backing, Backing::Released)
    }

    /// Switch the calling thread into this namespace
    ///
    /// # Errors
    /// Returns [`Error::NamespaceSwitchFailed`] if the handle is released or
    /// not kernel-backed, if setns(2) fails, or if the thread does not end
    /// up in the expected namespace.
    pub fn activate(&self) -> Result<()> {
        let file = match &self.backing {
            Backing::Open(file) => file,
            Backing::Virtual => {
                return Err(Error::NamespaceSwitchFailed {
                    message: format!("{} is not backed by a kernel reference", self.id),
                });
            }
            Backing::Released => {
                return Err(Error::NamespaceSwitchFailed {
                    message: format!("handle for {} already released", self.id),
                });
            }
        };

        setns(file, CloneFlags::CLONE_NEWNET).map_err(|e| Error::NamespaceSwitchFailed {
            message: format!("setns into {} ({}): {e}", self.id, self.origin.display()),
        })?;

        let now = NamespaceId::of_current_thread()?;
        if now != self.id {
            return Err(Error::NamespaceSwitchFailed {
                message: format!("thread is in {now} after setns into {}", self.id),
            });
        }

        debug!(netns = %self.id, "Switched thread netns");
        Ok(())
    }

    /// Close the underlying reference; later calls are no-ops
    pub fn release(&mut self) {
        if self.is_released() {
            return;
        }

        trace!(netns = %self.id, "Releasing netns handle");
        // Dropping the file closes the descriptor
        self.backing = Backing::Released;
    }
}

impl fmt::Debug for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.backing {
            Backing::Open(_) => "open",
            Backing::Virtual => "virtual",
            Backing::Released => "released",
        };
        f.debug_struct("NamespaceHandle")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("state", &state)
            .finish()
    }
}

/// Operations on network namespaces
///
/// This allows for different implementations:
/// - [`HostNamespaces`] - the kernel, via `/proc` and setns(2)
/// - [`MockNamespaces`](crate::MockNamespaces) - in-memory, for tests
pub trait NamespaceOps: Send + Sync {
    /// Capture the calling thread's namespace
    fn current(&self) -> Result<NamespaceHandle>;

    /// Resolve the namespace of a running process
    fn from_process(&self, pid: ProcessId) -> Result<NamespaceHandle>;

    /// Make `handle` the calling thread's namespace
    fn activate(&self, handle: &NamespaceHandle) -> Result<()>;

    /// Identity of the namespace the calling thread is in right now
    fn active(&self) -> Result<NamespaceId>;

    /// Release a handle; idempotent
    fn release(&self, handle: &mut NamespaceHandle) {
        handle.release();
    }
}

/// Kernel-backed namespace operations
#[derive(Debug, Clone, Copy, Default)]
pub struct HostNamespaces;

impl NamespaceOps for HostNamespaces {
    fn current(&self) -> Result<NamespaceHandle> {
        NamespaceHandle::current()
    }

    fn from_process(&self, pid: ProcessId) -> Result<NamespaceHandle> {
        NamespaceHandle::from_process(pid)
    }

    fn activate(&self, handle: &NamespaceHandle) -> Result<()> {
        handle.activate()
    }

    fn active(&self) -> Result<NamespaceId> {
        NamespaceId::of_current_thread()
    }
}
