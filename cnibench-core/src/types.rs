//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

/// Plugin identifier with validation
///
/// Derived from a configuration file's base name with the
/// [`PluginId::CONF_SUFFIX`] stripped, e.g. `bridge.conf` -> `bridge`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct PluginId(String);

impl PluginId {
    /// Maximum length for plugin IDs (a file name)
    pub const MAX_LENGTH: usize = 255;

    /// Suffix carried by plugin configuration files
    pub const CONF_SUFFIX: &'static str = ".conf";

    /// Create a new `PluginId` with validation
    ///
    /// # Errors
    /// Returns error if ID is invalid (empty, too long, non-ASCII or a path)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Derive the identifier from a configuration file name
    ///
    /// # Errors
    /// Returns error if the remaining name is not a valid ID
    pub fn from_file_name(file_name: &str) -> Result<Self> {
        Self::new(file_name.strip_suffix(Self::CONF_SUFFIX).unwrap_or(file_name))
    }

    /// Validate a plugin ID
    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidConfig {
                message: "Plugin ID cannot be empty".to_string(),
            });
        }

        if id.len() > Self::MAX_LENGTH {
            return Err(Error::InvalidConfig {
                message: format!("Plugin ID too long (max {} chars)", Self::MAX_LENGTH),
            });
        }

        if !id.chars().all(|c| c.is_ascii_graphic() && c != '/') {
            return Err(Error::InvalidConfig {
                message: format!("Plugin ID `{id}` must be printable ASCII without `/`"),
            });
        }

        if id == "." || id == ".." {
            return Err(Error::InvalidConfig {
                message: format!("Plugin ID `{id}` is not a file name"),
            });
        }

        Ok(())
    }

    /// Name of the configuration file this plugin is loaded from
    #[must_use]
    pub fn conf_file_name(&self) -> String {
        format!("{}{}", self.0, Self::CONF_SUFFIX)
    }

    /// Get the plugin ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PluginId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for PluginId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<PluginId> for String {
    fn from(id: PluginId) -> Self {
        id.0
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        #[allow(clippy::cast_possible_wrap)]
        Self(std::process::id() as i32)
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Path of this process' network namespace reference
    #[must_use]
    pub fn netns_path(self) -> PathBuf {
        PathBuf::from(format!("/proc/{}/ns/net", self.0))
    }

    /// Correlation id handed to attachment plugins for this process
    #[must_use]
    pub fn correlation_id(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_id_validation() {
        assert!(PluginId::new("flannel-ipvlan").is_ok());
        assert!(PluginId::new("weave_net.v2").is_ok());
        assert!(PluginId::new("").is_err());
        assert!(PluginId::new("a".repeat(256)).is_err());
        assert!(PluginId::new("bad id").is_err());
        assert!(PluginId::new("net.d/bridge").is_err());
        assert!(PluginId::new("..").is_err());
        assert!(PluginId::new("brücke").is_err());
    }

    #[test]
    fn test_plugin_id_from_file_name() {
        let id = PluginId::from_file_name("macvlan.conf").unwrap();
        assert_eq!(id.as_str(), "macvlan");
        assert_eq!(id.conf_file_name(), "macvlan.conf");

        // Only the trailing suffix is stripped
        let id = PluginId::from_file_name("calico.conflist").unwrap();
        assert_eq!(id.as_str(), "calico.conflist");

        assert!(PluginId::from_file_name(".conf").is_err());
    }

    #[test]
    fn test_plugin_id_serde() {
        let id = PluginId::new("bridge").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bridge\"");
        let deserialized: PluginId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);

        assert!(serde_json::from_str::<PluginId>("\"a b\"").is_err());
    }

    #[test]
    fn test_process_id() {
        let pid = ProcessId::from_raw(123);
        assert_eq!(pid.as_raw(), 123);
        assert_eq!(pid.as_nix_pid().as_raw(), 123);
        assert_eq!(pid.netns_path(), PathBuf::from("/proc/123/ns/net"));
        assert_eq!(pid.correlation_id(), "123");
    }
}
