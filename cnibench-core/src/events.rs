//! Benchmark lifecycle phases and events with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{PluginId, ProcessId};

/// Step of a plugin lifecycle iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Spawning the isolation process
    Spawn,
    /// Loading the plugin configuration
    LoadConfig,
    /// Plugin ADD
    Attach,
    /// Reading the default interface address from the result
    ExtractAddress,
    /// Opening the isolation process' namespace
    ResolveNamespace,
    /// Switching the worker thread into the isolated namespace
    ActivateNamespace,
    /// Enumerating links inside the namespace
    ListLinks,
    /// Outbound connectivity probe
    Probe,
    /// Switching back to the original namespace
    RestoreNamespace,
    /// Plugin DEL
    Detach,
    /// Killing the isolation process
    Terminate,
}

impl Phase {
    /// Phases whose failure is only ever logged
    #[must_use]
    pub const fn is_diagnostic(self) -> bool {
        matches!(self, Self::ListLinks | Self::Probe)
    }

    /// Human readable name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::LoadConfig => "load config",
            Self::Attach => "attach",
            Self::ExtractAddress => "extract address",
            Self::ResolveNamespace => "resolve namespace",
            Self::ActivateNamespace => "activate namespace",
            Self::ListLinks => "list links",
            Self::Probe => "outbound probe",
            Self::RestoreNamespace => "restore namespace",
            Self::Detach => "detach",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States an iteration passes through, strictly in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing acquired yet
    Idle,
    /// Isolation process running
    ProcessSpawned,
    /// Plugin configuration loaded
    ConfigLoaded,
    /// Plugin ADD succeeded; a DEL is owed
    Attached,
    /// Worker thread switched into the isolated namespace
    NamespaceActive,
    /// Default interface address extracted and diagnostics done
    Verified,
    /// Back in the original namespace, tearing down
    Detaching,
    /// Process killed, everything released
    Terminated,
}

impl LifecycleState {
    /// Whether a DEL is still owed: attached, and unwinding has not started
    #[must_use]
    pub fn owes_detach(self) -> bool {
        self >= Self::Attached && self < Self::Detaching
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ProcessSpawned => "process spawned",
            Self::ConfigLoaded => "config loaded",
            Self::Attached => "attached",
            Self::NamespaceActive => "namespace active",
            Self::Verified => "verified",
            Self::Detaching => "detaching",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Events emitted during a plugin lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Iteration moved to a new state
    Transition {
        /// Plugin being exercised
        plugin: PluginId,
        /// Isolation process, once spawned
        pid: Option<ProcessId>,
        /// State entered
        state: LifecycleState,
    },

    /// A timed phase completed
    PhaseTimed {
        /// Plugin being exercised
        plugin: PluginId,
        /// Phase that was timed
        phase: Phase,
        /// Wall-clock duration
        #[serde(with = "duration_serde")]
        duration: Duration,
    },

    /// A cleanup step failed while unwinding
    CleanupFailed {
        /// Plugin being exercised
        plugin: PluginId,
        /// Cleanup step
        phase: Phase,
        /// Error message
        message: String,
    },

    /// An observational step failed
    DiagnosticFailed {
        /// Plugin being exercised
        plugin: PluginId,
        /// Diagnostic step
        phase: Phase,
        /// Error message
        message: String,
    },
}

impl LifecycleEvent {
    /// Get the plugin from any event
    #[must_use]
    pub const fn plugin(&self) -> &PluginId {
        match self {
            Self::Transition { plugin, .. }
            | Self::PhaseTimed { plugin, .. }
            | Self::CleanupFailed { plugin, .. }
            | Self::DiagnosticFailed { plugin, .. } => plugin,
        }
    }

    /// Check if this event reports a problem
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CleanupFailed { .. } | Self::DiagnosticFailed { .. }
        )
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::Transition { plugin, pid, state } => {
                tracing::debug!(
                    plugin = %plugin,
                    pid = pid.map(ProcessId::as_raw),
                    state = %state,
                    event = "transition",
                    "Lifecycle transition"
                );
            }
            Self::PhaseTimed {
                plugin,
                phase,
                duration,
            } => {
                tracing::debug!(
                    plugin = %plugin,
                    phase = %phase,
                    duration_us = duration.as_micros(),
                    event = "phase_timed",
                    "Phase timed"
                );
            }
            Self::CleanupFailed {
                plugin,
                phase,
                message,
            } => {
                tracing::warn!(
                    plugin = %plugin,
                    phase = %phase,
                    message = %message,
                    event = "cleanup_failed",
                    "Cleanup step failed"
                );
            }
            Self::DiagnosticFailed {
                plugin,
                phase,
                message,
            } => {
                tracing::warn!(
                    plugin = %plugin,
                    phase = %phase,
                    message = %message,
                    event = "diagnostic_failed",
                    "Diagnostic step failed"
                );
            }
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition { plugin, state, .. } => write!(f, "[{plugin}] {state}"),
            Self::PhaseTimed {
                plugin,
                phase,
                duration,
            } => write!(f, "[{plugin}] {phase} took {duration:?}"),
            Self::CleanupFailed {
                plugin,
                phase,
                message,
            } => write!(f, "[{plugin}] cleanup {phase} failed: {message}"),
            Self::DiagnosticFailed {
                plugin,
                phase,
                message,
            } => write!(f, "[{plugin}] {phase} failed: {message}"),
        }
    }
}

// Durations travel as nanoseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_nanos() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_order() {
        assert!(LifecycleState::Idle < LifecycleState::ProcessSpawned);
        assert!(LifecycleState::Detaching < LifecycleState::Terminated);

        assert!(!LifecycleState::ConfigLoaded.owes_detach());
        assert!(LifecycleState::Attached.owes_detach());
        assert!(LifecycleState::Verified.owes_detach());
        assert!(!LifecycleState::Detaching.owes_detach());
        assert!(!LifecycleState::Terminated.owes_detach());
    }

    #[test]
    fn test_diagnostic_phases() {
        assert!(Phase::ListLinks.is_diagnostic());
        assert!(Phase::Probe.is_diagnostic());
        assert!(!Phase::Detach.is_diagnostic());
    }

    #[test]
    fn test_event_serde() {
        let plugin = PluginId::new("ptp").unwrap();
        let event = LifecycleEvent::PhaseTimed {
            plugin,
            phase: Phase::Attach,
            duration: Duration::from_micros(1500),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"phase_timed\""));
        assert!(json.contains("\"duration\":1500000"));

        let deserialized: LifecycleEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.plugin(), deserialized.plugin());
        assert!(!deserialized.is_failure());
    }

    #[test]
    fn test_event_display() {
        let plugin = PluginId::new("macvlan").unwrap();
        let event = LifecycleEvent::CleanupFailed {
            plugin,
            phase: Phase::Detach,
            message: "boom".to_string(),
        };
        assert!(event.is_failure());
        assert_eq!(event.to_string(), "[macvlan] cleanup detach failed: boom");
    }
}
