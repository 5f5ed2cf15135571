//! Error types for cnibench

use std::path::PathBuf;

use thiserror::Error;

use crate::{Phase, PluginId, ProcessId};

/// cnibench error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),

    /// Setting up the benchmark failed before any plugin ran
    #[error("Initialization failed: {message}")]
    Initialization {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// The plugin configuration directory could not be traversed
    #[error("Reading plugin configuration directory {} failed: {source}", path.display())]
    DirectoryUnreadable {
        /// Directory that was walked
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// The calling thread's network namespace could not be captured
    #[error("Getting current netns failed: {source}")]
    NamespaceUnavailable {
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// The network namespace of a process could not be opened
    #[error("Getting netns of process {pid} failed: {source}")]
    ProcessNamespaceUnavailable {
        /// Process whose namespace was requested
        pid: ProcessId,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// setns(2) into a namespace failed
    #[error("Switching netns failed: {message}")]
    NamespaceSwitchFailed {
        /// Error message
        message: String,
    },

    /// The isolation process could not be started
    #[error("Unsharing command `{command}` failed: {source}")]
    SpawnFailed {
        /// Command line that was launched
        command: String,
        /// Underlying cause
        #[source]
        source: std::io::Error,
    },

    /// The isolation process could not be stopped
    #[error("Terminating process {pid} failed: {message}")]
    TerminateFailed {
        /// Process being terminated
        pid: ProcessId,
        /// Error message
        message: String,
    },

    /// A plugin configuration could not be loaded
    #[error("Loading CNI configuration for {plugin} failed: {message}")]
    ConfigLoadFailed {
        /// Plugin identifier
        plugin: PluginId,
        /// Error message
        message: String,
    },

    /// The plugin ADD command failed
    #[error("Setting up netns for id ({id}) and netns ({}) failed: {message}", netns.display())]
    AttachFailed {
        /// Correlation id passed to the plugin
        id: String,
        /// Namespace path passed to the plugin
        netns: PathBuf,
        /// Error message
        message: String,
    },

    /// The plugin DEL command failed
    #[error("Removing network for id ({id}) and netns ({}) failed: {message}", netns.display())]
    DetachFailed {
        /// Correlation id passed to the plugin
        id: String,
        /// Namespace path passed to the plugin
        netns: PathBuf,
        /// Error message
        message: String,
    },

    /// The attachment result did not report the expected interface
    #[error("Attachment result has no IP configuration for interface {interface}")]
    MissingInterface {
        /// Interface that was expected
        interface: String,
    },

    /// A lifecycle step failed for one plugin
    #[error("[{plugin}] {phase} failed: {source}")]
    Lifecycle {
        /// Plugin being exercised
        plugin: PluginId,
        /// Step that failed
        phase: Phase,
        /// Underlying cause
        #[source]
        source: Box<Error>,
    },

    /// An observational step failed; never fatal to a lifecycle
    #[error("Diagnostic failed: {message}")]
    Diagnostic {
        /// Error message
        message: String,
    },

    /// The namespace worker thread is gone
    #[error("Namespace worker unavailable")]
    WorkerUnavailable,
}

impl Error {
    /// Wrap an error with the plugin and phase it occurred in
    #[must_use]
    pub fn in_phase(self, plugin: &PluginId, phase: Phase) -> Self {
        Self::Lifecycle {
            plugin: plugin.clone(),
            phase,
            source: Box::new(self),
        }
    }

    /// The phase a lifecycle error occurred in, if any
    #[must_use]
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Lifecycle { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Whether this error must abort the whole run rather than one plugin
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Initialization { .. }
                | Self::InvalidConfig { .. }
                | Self::DirectoryUnreadable { .. }
                | Self::NamespaceUnavailable { .. }
                | Self::WorkerUnavailable
        )
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::WorkerUnavailable
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::WorkerUnavailable
    }
}

/// Result type alias for cnibench operations
pub type Result<T> = std::result::Result<T, Error>;
