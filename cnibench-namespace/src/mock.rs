//! In-memory namespace and process collaborators for testing

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cnibench_core::{Error, Journal, ProcessId, Result};

use crate::handle::{NamespaceHandle, NamespaceId, NamespaceOps};
use crate::process::{IsolationProcess, ProcessSpawner};

/// Identity the mock reports for the thread's starting namespace
pub const MOCK_ORIGINAL_NS: NamespaceId = NamespaceId::from_raw(4, 4_026_531_840);

/// Identity the mock assigns to the namespace of `pid`
#[must_use]
pub fn mock_process_ns(pid: ProcessId) -> NamespaceId {
    NamespaceId::from_raw(4, 4_026_600_000 + u64::from(pid.as_raw().unsigned_abs()))
}

#[derive(Debug)]
struct MockNsState {
    active: NamespaceId,
    activations: usize,
    fail_resolve: bool,
    fail_activate: bool,
    fail_restore: bool,
}

/// Mock namespace operations (doesn't touch the kernel)
///
/// Tracks a single "active" namespace, standing in for the calling thread's.
///
/// # Example
/// ```
/// use cnibench_namespace::{MockNamespaces, NamespaceOps, MOCK_ORIGINAL_NS};
/// use cnibench_core::ProcessId;
///
/// let ns = MockNamespaces::new();
/// let original = ns.current().unwrap();
/// let target = ns.from_process(ProcessId::from_raw(10)).unwrap();
///
/// ns.activate(&target).unwrap();
/// assert_ne!(ns.active().unwrap(), MOCK_ORIGINAL_NS);
///
/// ns.activate(&original).unwrap();
/// assert_eq!(ns.active().unwrap(), MOCK_ORIGINAL_NS);
/// ```
#[derive(Debug, Clone)]
pub struct MockNamespaces {
    state: Arc<Mutex<MockNsState>>,
    journal: Journal,
}

impl MockNamespaces {
    /// Create a new mock positioned in [`MOCK_ORIGINAL_NS`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    /// Create a mock recording into a shared journal
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockNsState {
                active: MOCK_ORIGINAL_NS,
                activations: 0,
                fail_resolve: false,
                fail_activate: false,
                fail_restore: false,
            })),
            journal,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockNsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `from_process` fail
    pub fn fail_resolve(&self, fail: bool) {
        self.lock().fail_resolve = fail;
    }

    /// Make `activate` fail for every namespace except the original
    pub fn fail_activate(&self, fail: bool) {
        self.lock().fail_activate = fail;
    }

    /// Make `activate` fail for the original namespace only
    pub fn fail_restore(&self, fail: bool) {
        self.lock().fail_restore = fail;
    }

    /// Number of successful `activate` calls (for testing)
    #[must_use]
    pub fn activations(&self) -> usize {
        self.lock().activations
    }
}

impl Default for MockNamespaces {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceOps for MockNamespaces {
    fn current(&self) -> Result<NamespaceHandle> {
        let active = self.lock().active;
        self.journal.record(format!("current {}", active.inode()));
        Ok(NamespaceHandle::detached(active, "mock:current"))
    }

    fn from_process(&self, pid: ProcessId) -> Result<NamespaceHandle> {
        if self.lock().fail_resolve {
            self.journal.record(format!("resolve-failed {pid}"));
            return Err(Error::ProcessNamespaceUnavailable {
                pid,
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        self.journal.record(format!("resolve {pid}"));
        Ok(NamespaceHandle::detached(mock_process_ns(pid), pid.netns_path()))
    }

    fn activate(&self, handle: &NamespaceHandle) -> Result<()> {
        let mut state = self.lock();
        if handle.is_released() {
            return Err(Error::NamespaceSwitchFailed {
                message: format!("handle for {} already released", handle.id()),
            });
        }
        let refused = if handle.id() == MOCK_ORIGINAL_NS {
            state.fail_restore
        } else {
            state.fail_activate
        };
        if refused {
            return Err(Error::NamespaceSwitchFailed {
                message: format!("mock setns into {} refused", handle.id()),
            });
        }

        state.active = handle.id();
        state.activations += 1;
        drop(state);

        self.journal.record(format!("activate {}", handle.id().inode()));
        Ok(())
    }

    fn active(&self) -> Result<NamespaceId> {
        Ok(self.lock().active)
    }

    fn release(&self, handle: &mut NamespaceHandle) {
        if !handle.is_released() {
            self.journal.record(format!("release {}", handle.id().inode()));
        }
        handle.release();
    }
}

/// Mock process spawner (no real children)
#[derive(Debug, Clone)]
pub struct MockSpawner {
    next_pid: Arc<AtomicI32>,
    spawned: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    fail: Arc<Mutex<bool>>,
    journal: Journal,
}

impl MockSpawner {
    /// Create a new mock spawner; pids start at 1000
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    /// Create a spawner recording into a shared journal
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            next_pid: Arc::new(AtomicI32::new(1000)),
            spawned: Arc::new(AtomicUsize::new(0)),
            live: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(Mutex::new(false)),
            journal,
        }
    }

    /// Make `spawn` fail
    pub fn fail_spawn(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Number of processes spawned (for testing)
    #[must_use]
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Number of processes spawned but not terminated (for testing)
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Default for MockSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessSpawner for MockSpawner {
    async fn spawn(&self) -> Result<Box<dyn IsolationProcess>> {
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            self.journal.record("spawn-failed");
            return Err(Error::SpawnFailed {
                command: "mock".to_string(),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }

        let pid = ProcessId::from_raw(self.next_pid.fetch_add(1, Ordering::SeqCst));
        self.spawned.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        self.journal.record(format!("spawn {pid}"));

        Ok(Box::new(MockProcess {
            pid,
            running: true,
            live: Arc::clone(&self.live),
            journal: self.journal.clone(),
        }))
    }
}

/// Process handed out by [`MockSpawner`]
#[derive(Debug)]
pub struct MockProcess {
    pid: ProcessId,
    running: bool,
    live: Arc<AtomicUsize>,
    journal: Journal,
}

#[async_trait]
impl IsolationProcess for MockProcess {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.running {
            self.running = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.journal.record(format!("terminate {}", self.pid));
        }
        Ok(())
    }
}

impl Drop for MockProcess {
    fn drop(&mut self) {
        if self.running {
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.journal.record(format!("dropped {}", self.pid));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_spawner_lifecycle() {
        let journal = Journal::new();
        let spawner = MockSpawner::with_journal(journal.clone());

        let mut first = spawner.spawn().await.unwrap();
        let second = spawner.spawn().await.unwrap();
        assert_ne!(first.pid(), second.pid());
        assert_eq!(spawner.live(), 2);

        first.terminate().await.unwrap();
        first.terminate().await.unwrap();
        assert!(!first.is_running());
        assert_eq!(spawner.live(), 1);
        assert_eq!(journal.count("terminate"), 1);

        drop(second);
        assert_eq!(spawner.live(), 0);
        assert_eq!(spawner.spawned(), 2);
    }

    #[tokio::test]
    async fn test_mock_spawner_failure() {
        let spawner = MockSpawner::new();
        spawner.fail_spawn(true);

        assert!(matches!(
            spawner.spawn().await,
            Err(Error::SpawnFailed { .. })
        ));
        assert_eq!(spawner.spawned(), 0);
    }

    #[test]
    fn test_mock_namespaces_release_idempotent() {
        let journal = Journal::new();
        let ns = MockNamespaces::with_journal(journal.clone());
        let mut handle = ns.from_process(ProcessId::from_raw(7)).unwrap();

        ns.release(&mut handle);
        ns.release(&mut handle);

        assert_eq!(journal.count("release"), 1);
        assert!(ns.activate(&handle).is_err());
    }

    #[test]
    fn test_mock_namespaces_activate_failure_keeps_active() {
        let ns = MockNamespaces::new();
        ns.fail_activate(true);

        let target = ns.from_process(ProcessId::from_raw(9)).unwrap();
        assert!(ns.activate(&target).is_err());
        assert_eq!(ns.active().unwrap(), MOCK_ORIGINAL_NS);
        assert_eq!(ns.activations(), 0);
    }
}
