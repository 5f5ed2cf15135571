//! Benchmark configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Default location of the system-wide CNI plugin binaries
pub const DEFAULT_CNI_BIN_DIR: &str = "/opt/cni/bin";

/// Upper bound for the plugin and probe timeouts, in seconds
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Upper bound for the SIGTERM grace period, in milliseconds
pub const MAX_TERMINATE_GRACE_MS: u64 = 60_000;

/// Benchmark configuration
///
/// Relative paths are resolved against the working directory with
/// [`BenchConfig::rooted_at`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Directory holding one `<plugin>.conf` per plugin
    pub conf_dir: PathBuf,

    /// Directories searched for plugin binaries, in order
    pub plugin_dirs: Vec<PathBuf>,

    /// Interface prefix; the default interface is `<prefix>0`
    pub interface_prefix: String,

    /// Attach the loopback network before the plugin's network
    pub loopback: bool,

    /// Long-lived command anchoring the isolated namespace
    pub anchor_command: Vec<String>,

    /// Upper bound for a single plugin invocation, in seconds
    pub plugin_timeout_secs: u64,

    /// Time given to the anchor process after SIGTERM, in milliseconds
    pub terminate_grace_ms: u64,

    /// Endpoint of the outbound connectivity probe
    pub probe_endpoint: String,

    /// Upper bound for the outbound probe, in seconds
    pub probe_timeout_secs: u64,

    /// Enumerate links and probe connectivity inside the namespace
    pub diagnostics: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            conf_dir: PathBuf::from("net.d"),
            plugin_dirs: vec![PathBuf::from("bin"), PathBuf::from(DEFAULT_CNI_BIN_DIR)],
            interface_prefix: "eth".to_string(),
            loopback: true,
            anchor_command: vec!["sleep".to_string(), "3600".to_string()],
            plugin_timeout_secs: 60,
            terminate_grace_ms: 500,
            probe_endpoint: "https://httpbin.org/ip".to_string(),
            probe_timeout_secs: 10,
            diagnostics: true,
        }
    }
}

impl BenchConfig {
    /// Create a new configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; missing keys keep defaults
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;

        let config: Self = serde_json::from_str(&raw).map_err(|e| Error::InvalidConfig {
            message: format!("Failed to parse {}: {e}", path.display()),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Set the plugin configuration directory
    #[must_use]
    pub fn with_conf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.conf_dir = dir.into();
        self
    }

    /// Replace the plugin binary directories
    #[must_use]
    pub fn with_plugin_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.plugin_dirs = dirs;
        self
    }

    /// Set the interface prefix
    #[must_use]
    pub fn with_interface_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.interface_prefix = prefix.into();
        self
    }

    /// Enable the loopback network
    #[must_use]
    pub fn with_loopback(mut self, enable: bool) -> Self {
        self.loopback = enable;
        self
    }

    /// Set the anchor command
    #[must_use]
    pub fn with_anchor_command(mut self, command: Vec<String>) -> Self {
        self.anchor_command = command;
        self
    }

    /// Set the per-invocation plugin timeout
    #[must_use]
    pub fn with_plugin_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set the probe endpoint
    #[must_use]
    pub fn with_probe_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.probe_endpoint = endpoint.into();
        self
    }

    /// Enable link enumeration and the outbound probe
    #[must_use]
    pub fn with_diagnostics(mut self, enable: bool) -> Self {
        self.diagnostics = enable;
        self
    }

    /// Resolve relative directories against `base`
    #[must_use]
    pub fn rooted_at(mut self, base: &Path) -> Self {
        if self.conf_dir.is_relative() {
            self.conf_dir = base.join(&self.conf_dir);
        }
        self.plugin_dirs = self
            .plugin_dirs
            .into_iter()
            .map(|dir| if dir.is_relative() { base.join(dir) } else { dir })
            .collect();
        self
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    /// Returns error describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.plugin_dirs.is_empty() {
            return Err(Error::InvalidConfig {
                message: "At least one plugin directory is required".to_string(),
            });
        }

        if self.interface_prefix.is_empty() {
            return Err(Error::InvalidConfig {
                message: "Interface prefix cannot be empty".to_string(),
            });
        }

        if self.anchor_command.first().is_none_or(String::is_empty) {
            return Err(Error::InvalidConfig {
                message: "Anchor command cannot be empty".to_string(),
            });
        }

        for (name, secs) in [
            ("plugin_timeout_secs", self.plugin_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(Error::InvalidConfig {
                    message: format!("{name} must be between 1 and {MAX_TIMEOUT_SECS}, got {secs}"),
                });
            }
        }

        if self.terminate_grace_ms > MAX_TERMINATE_GRACE_MS {
            return Err(Error::InvalidConfig {
                message: format!(
                    "terminate_grace_ms must be at most {MAX_TERMINATE_GRACE_MS}, got {}",
                    self.terminate_grace_ms
                ),
            });
        }

        Ok(())
    }

    /// Name of the interface the plugin is asked to create
    #[must_use]
    pub fn default_interface(&self) -> String {
        format!("{}0", self.interface_prefix)
    }

    /// Per-invocation plugin timeout
    #[must_use]
    pub const fn plugin_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs)
    }

    /// Grace period between SIGTERM and SIGKILL
    #[must_use]
    pub const fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Outbound probe timeout
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
