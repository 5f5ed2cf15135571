//! Plugin lifecycle orchestration
//!
//! One iteration walks a plugin through spawn, load, attach, verification
//! inside the isolated namespace and teardown. The orchestrator must live on
//! a single OS thread: it captures that thread's namespace at construction
//! and puts the thread back there at the end of every iteration.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cnibench_cni::{AttachmentBackend, CniClient, MockAttachment};
use cnibench_core::{
    BenchConfig, Error, Journal, LifecycleEvent, LifecycleState, Phase, PluginId, ProcessId,
    Result,
};
use cnibench_namespace::{
    HostNamespaces, IsolationProcess, MockNamespaces, MockSpawner, NamespaceHandle,
    NamespaceOps, ProcessSpawner, UnshareSpawner,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

use crate::diagnostics::{Diagnostics, HostDiagnostics, MockDiagnostics};

/// Everything the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    /// Namespace capture, resolution and switching
    pub namespaces: Arc<dyn NamespaceOps>,
    /// Isolation process launcher
    pub spawner: Arc<dyn ProcessSpawner>,
    /// Plugin attachment
    pub attachment: Arc<dyn AttachmentBackend>,
    /// In-namespace checks
    pub diagnostics: Arc<dyn Diagnostics>,
}

impl Collaborators {
    /// Kernel, CNI plugins and network, as configured
    ///
    /// # Errors
    /// Returns error if the configuration is invalid
    pub fn host(config: &BenchConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            namespaces: Arc::new(HostNamespaces),
            spawner: Arc::new(UnshareSpawner::new(
                config.anchor_command.clone(),
                config.terminate_grace(),
            )?),
            attachment: Arc::new(CniClient::new(config)),
            diagnostics: Arc::new(HostDiagnostics::from_config(config)),
        })
    }

    /// All mocks, sharing one journal
    #[must_use]
    pub fn mock(mocks: &MockSet) -> Self {
        Self {
            namespaces: Arc::new(mocks.namespaces.clone()),
            spawner: Arc::new(mocks.spawner.clone()),
            attachment: Arc::new(mocks.attachment.clone()),
            diagnostics: Arc::new(mocks.diagnostics.clone()),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Handles on a full set of mock collaborators (for testing)
#[derive(Debug, Clone)]
pub struct MockSet {
    /// Shared call journal
    pub journal: Journal,
    /// Mock namespaces
    pub namespaces: MockNamespaces,
    /// Mock spawner
    pub spawner: MockSpawner,
    /// Mock attachment backend
    pub attachment: MockAttachment,
    /// Mock diagnostics
    pub diagnostics: MockDiagnostics,
}

impl MockSet {
    /// Fresh mocks recording into one journal
    #[must_use]
    pub fn new() -> Self {
        let journal = Journal::new();
        let namespaces = MockNamespaces::with_journal(journal.clone());

        Self {
            spawner: MockSpawner::with_journal(journal.clone()),
            attachment: MockAttachment::with_journal(journal.clone()),
            diagnostics: MockDiagnostics::new(namespaces.clone(), journal.clone()),
            namespaces,
            journal,
        }
    }
}

impl Default for MockSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-iteration switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOptions {
    /// Enumerate links and probe connectivity inside the namespace
    pub diagnostics: bool,
    /// Log progress at info level rather than debug
    pub announce: bool,
}

impl IterationOptions {
    /// Diagnostics on, progress announced
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            diagnostics: true,
            announce: true,
        }
    }

    /// Diagnostics off, quiet; for timing loops
    #[must_use]
    pub const fn timing() -> Self {
        Self {
            diagnostics: false,
            announce: false,
        }
    }

    /// Enable or disable diagnostics
    #[must_use]
    pub const fn with_diagnostics(mut self, enable: bool) -> Self {
        self.diagnostics = enable;
        self
    }
}

impl Default for IterationOptions {
    fn default() -> Self {
        Self::verbose()
    }
}

/// Outcome of one successful iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationReport {
    /// Plugin exercised
    pub plugin: PluginId,
    /// Isolation process
    pub pid: ProcessId,
    /// Default interface
    pub interface: String,
    /// First address of the default interface
    pub ip: IpAddr,
    /// Prefix length of that address
    pub prefix_len: u8,
    /// Links seen inside the namespace, as `kind->name`
    pub links: Vec<String>,
    /// Compacted body of the outbound probe
    pub probe: Option<String>,
    /// Duration of the attach call alone
    pub attach: Duration,
    /// Duration of the detach call alone
    pub detach: Duration,
}

/// Resources acquired by one iteration, released by `unwind`
struct IterationScope {
    plugin: PluginId,
    state: LifecycleState,
    process: Option<Box<dyn IsolationProcess>>,
    resolved: Option<NamespaceHandle>,
}

impl IterationScope {
    fn new(plugin: &PluginId) -> Self {
        Self {
            plugin: plugin.clone(),
            state: LifecycleState::Idle,
            process: None,
            resolved: None,
        }
    }

    fn pid(&self) -> Option<ProcessId> {
        self.process.as_ref().map(|process| process.pid())
    }
}

impl Drop for IterationScope {
    /// Fallback cleanup (if unwind didn't run)
    fn drop(&mut self) {
        // The process and handle clean up on their own drop; a DEL cannot be issued here
        if self.state.owes_detach() {
            error!(
                plugin = %self.plugin,
                pid = self.pid().map(ProcessId::as_raw),
                "Iteration dropped with a network still attached"
            );
        }
    }
}

/// Drives plugin lifecycles on the thread it was created on
pub struct Orchestrator {
    collaborators: Collaborators,
    original: NamespaceHandle,
    poisoned: bool,
    events: Option<UnboundedSender<LifecycleEvent>>,
}

impl Orchestrator {
    /// Create an orchestrator, capturing the calling thread's namespace
    ///
    /// # Errors
    /// Returns [`Error::NamespaceUnavailable`] if the namespace cannot be captured
    pub fn new(collaborators: Collaborators) -> Result<Self> {
        let original = collaborators.namespaces.current()?;
        debug!(netns = %original.id(), "Captured original netns");

        Ok(Self {
            collaborators,
            original,
            poisoned: false,
            events: None,
        })
    }

    /// Also deliver every lifecycle event to `sender`
    #[must_use]
    pub fn with_events(mut self, sender: UnboundedSender<LifecycleEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Whether restoring the original namespace has failed
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Handle on the namespace captured at construction
    #[must_use]
    pub const fn original(&self) -> &NamespaceHandle {
        &self.original
    }

    /// Run one full lifecycle for `plugin`
    ///
    /// Whatever happens, the thread is back in the original namespace, an
    /// attached network has been detached and the isolation process is gone
    /// when this returns.
    ///
    /// # Errors
    /// Returns [`Error::Lifecycle`] naming the failing phase
    pub async fn run_iteration(
        &mut self,
        plugin: &PluginId,
        options: IterationOptions,
    ) -> Result<IterationReport> {
        if self.poisoned {
            return Err(Error::NamespaceSwitchFailed {
                message: format!(
                    "thread could not be restored to {} earlier; refusing to continue",
                    self.original.id()
                ),
            }
            .in_phase(plugin, Phase::RestoreNamespace));
        }

        let mut scope = IterationScope::new(plugin);
        let outcome = self.advance(&mut scope, options).await;
        let cleanup = self.unwind(&mut scope, outcome.is_ok()).await;

        match (outcome, cleanup) {
            (Ok(mut report), Ok(detach)) => {
                report.detach = detach;
                Ok(report)
            }
            (Ok(_), Err(e)) | (Err(e), _) => Err(e),
        }
    }

    async fn advance(
        &self,
        scope: &mut IterationScope,
        options: IterationOptions,
    ) -> Result<IterationReport> {
        let plugin = scope.plugin.clone();
        let c = &self.collaborators;

        let process = c
            .spawner
            .spawn()
            .await
            .map_err(|e| e.in_phase(&plugin, Phase::Spawn))?;
        let pid = process.pid();
        scope.process = Some(process);
        self.transition(scope, LifecycleState::ProcessSpawned);
        if options.announce {
            info!(plugin = %plugin, "netns process has PID {pid}");
        }

        c.attachment
            .load_configuration(&plugin)
            .await
            .map_err(|e| e.in_phase(&plugin, Phase::LoadConfig))?;
        self.transition(scope, LifecycleState::ConfigLoaded);

        let netns = pid.netns_path();
        let started = Instant::now();
        let attached = c.attachment.attach(&pid.correlation_id(), &netns).await;
        let attach = started.elapsed();
        let result = attached.map_err(|e| e.in_phase(&plugin, Phase::Attach))?;
        self.timed(&plugin, Phase::Attach, attach);
        self.transition(scope, LifecycleState::Attached);

        let interface = c.attachment.interface().to_string();
        let address = *result
            .default_ip(&interface)
            .map_err(|e| e.in_phase(&plugin, Phase::ExtractAddress))?;
        if options.announce {
            info!(
                plugin = %plugin,
                "IP of the default interface ({interface}) in the netns is {}",
                address.ip()
            );
        }

        let resolved = c
            .namespaces
            .from_process(pid)
            .map_err(|e| e.in_phase(&plugin, Phase::ResolveNamespace))?;
        let resolved = scope.resolved.insert(resolved);
        debug!(plugin = %plugin, netns = %resolved.id(), "Performing setns into netns from pid {pid}");
        c.namespaces
            .activate(resolved)
            .map_err(|e| e.in_phase(&plugin, Phase::ActivateNamespace))?;
        self.transition(scope, LifecycleState::NamespaceActive);

        let mut links = Vec::new();
        let mut probe = None;
        if options.diagnostics {
            match c.diagnostics.list_links().await {
                Ok(found) => {
                    links = found.iter().map(ToString::to_string).collect();
                    if options.announce && !links.is_empty() {
                        info!(plugin = %plugin, "found netns ip links: {}", links.join(", "));
                    }
                }
                Err(e) => self.setback(&plugin, Phase::ListLinks, &e),
            }

            match c.diagnostics.probe().await {
                Ok(body) => {
                    if options.announce {
                        info!(plugin = %plugin, "probe returned: {body}");
                    }
                    probe = Some(body);
                }
                Err(e) => self.setback(&plugin, Phase::Probe, &e),
            }
        }
        self.transition(scope, LifecycleState::Verified);

        Ok(IterationReport {
            plugin,
            pid,
            interface,
            ip: address.ip(),
            prefix_len: address.prefix_len(),
            links,
            probe,
            attach,
            detach: Duration::ZERO,
        })
    }

    /// Restore, detach, release, terminate; returns the detach duration
    ///
    /// On the failure path cleanup errors are only logged. On the success
    /// path the first cleanup error becomes the iteration's error.
    async fn unwind(&mut self, scope: &mut IterationScope, success: bool) -> Result<Duration> {
        let plugin = scope.plugin.clone();
        let mut first_error: Option<Error> = None;
        let mut note = |this: &Self, phase: Phase, e: Error| {
            this.setback(&plugin, phase, &e);
            if first_error.is_none() {
                first_error = Some(e.in_phase(&plugin, phase));
            }
        };

        if let Err(e) = self.restore() {
            self.poisoned = true;
            note(&*self, Phase::RestoreNamespace, e);
        }

        let owes_detach = scope.state.owes_detach();
        if scope.state > LifecycleState::Idle {
            self.transition(scope, LifecycleState::Detaching);
        }

        let mut detach = Duration::ZERO;
        if owes_detach && let Some(pid) = scope.pid() {
            let started = Instant::now();
            let detached = self
                .collaborators
                .attachment
                .detach(&pid.correlation_id(), &pid.netns_path())
                .await;
            detach = started.elapsed();

            match detached {
                Ok(()) => self.timed(&plugin, Phase::Detach, detach),
                Err(e) => note(&*self, Phase::Detach, e),
            }
        }

        if let Some(mut handle) = scope.resolved.take() {
            self.collaborators.namespaces.release(&mut handle);
        }

        if let Some(mut process) = scope.process.take() {
            if let Err(e) = process.terminate().await {
                note(&*self, Phase::Terminate, e);
            }
            self.transition(scope, LifecycleState::Terminated);
        }

        match first_error {
            Some(e) if success => Err(e),
            _ => Ok(detach),
        }
    }

    /// Put the thread back into the original namespace and check it stuck
    fn restore(&self) -> Result<()> {
        let namespaces = &self.collaborators.namespaces;
        namespaces.activate(&self.original)?;

        let now = namespaces.active()?;
        if now == self.original.id() {
            Ok(())
        } else {
            Err(Error::NamespaceSwitchFailed {
                message: format!("thread is in {now}, expected {}", self.original.id()),
            })
        }
    }

    fn transition(&self, scope: &mut IterationScope, state: LifecycleState) {
        scope.state = state;
        self.emit(LifecycleEvent::Transition {
            plugin: scope.plugin.clone(),
            pid: scope.pid(),
            state,
        });
    }

    fn timed(&self, plugin: &PluginId, phase: Phase, duration: Duration) {
        self.emit(LifecycleEvent::PhaseTimed {
            plugin: plugin.clone(),
            phase,
            duration,
        });
    }

    /// Report a failure that does not end the iteration by itself
    fn setback(&self, plugin: &PluginId, phase: Phase, e: &Error) {
        let plugin = plugin.clone();
        let message = e.to_string();
        self.emit(if phase.is_diagnostic() {
            LifecycleEvent::DiagnosticFailed {
                plugin,
                phase,
                message,
            }
        } else {
            LifecycleEvent::CleanupFailed {
                plugin,
                phase,
                message,
            }
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        event.emit_trace();
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.collaborators.namespaces.release(&mut self.original);
        debug!("Released original netns");
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("original", &self.original)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}
