//! CNI network configuration files and plugin binary lookup

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};

/// `type` of the loopback plugin
pub const LOOPBACK_TYPE: &str = "loopback";

/// Network name given to the loopback network
pub const LOOPBACK_NETWORK: &str = "cni-loopback";

/// Interface the loopback network is attached to
pub const LOOPBACK_INTERFACE: &str = "lo";

/// Version used when a configuration does not carry one
pub const DEFAULT_CNI_VERSION: &str = "0.3.1";

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "cniVersion", default)]
    cni_version: Option<String>,
    name: Option<String>,
    #[serde(rename = "type")]
    plugin_type: Option<String>,
}

/// A single-plugin network configuration
///
/// The raw bytes are handed to the plugin unchanged on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// `cniVersion`
    pub cni_version: String,
    /// `name`
    pub name: String,
    /// `type`, the plugin binary name
    pub plugin_type: String,
    bytes: Vec<u8>,
}

impl NetworkConfig {
    /// Parse a configuration document
    ///
    /// # Errors
    /// Returns a message if the document is not JSON or lacks `name`/`type`
    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let header: Header =
            serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))?;

        let plugin_type = header
            .plugin_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "missing `type`".to_string())?;
        if plugin_type.contains('/') {
            return Err(format!("`type` {plugin_type} must be a bare binary name"));
        }

        let name = header
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "missing network `name`".to_string())?;

        Ok(Self {
            cni_version: header
                .cni_version
                .unwrap_or_else(|| DEFAULT_CNI_VERSION.to_string()),
            name,
            plugin_type,
            bytes: bytes.to_vec(),
        })
    }

    /// Read and parse a configuration file
    ///
    /// # Errors
    /// Returns a message naming the file on read or parse failure
    pub async fn load(path: &Path) -> Result<Self, String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("reading {} failed: {e}", path.display()))?;
        Self::parse(&bytes).map_err(|e| format!("{}: {e}", path.display()))
    }

    /// The loopback network, at the given protocol version
    #[must_use]
    pub fn loopback(cni_version: &str) -> Self {
        let document = json!({
            "cniVersion": cni_version,
            "name": LOOPBACK_NETWORK,
            "type": LOOPBACK_TYPE,
        });

        Self {
            cni_version: cni_version.to_string(),
            name: LOOPBACK_NETWORK.to_string(),
            plugin_type: LOOPBACK_TYPE.to_string(),
            bytes: document.to_string().into_bytes(),
        }
    }

    /// Document passed on the plugin's stdin
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The configuration as a JSON value
    #[must_use]
    pub fn value(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }

    /// Whether DEL carries the ADD result as `prevResult` (CNI 0.4.0 and later)
    #[must_use]
    pub fn carries_prev_result(&self) -> bool {
        let mut parts = self.cni_version.split('.').map(str::parse::<u32>);
        match (parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor))) => (major, minor) >= (0, 4),
            _ => false,
        }
    }

    /// Document for a DEL following an ADD that printed `prev_result`
    ///
    /// Falls back to the unchanged configuration when the version predates
    /// `prevResult` or `prev_result` is not a JSON object.
    #[must_use]
    pub fn with_prev_result(&self, prev_result: &[u8]) -> Vec<u8> {
        if !self.carries_prev_result() {
            return self.bytes.clone();
        }

        match (self.value(), serde_json::from_slice::<Value>(prev_result)) {
            (Value::Object(mut document), Ok(result @ Value::Object(_))) => {
                document.insert("prevResult".to_string(), result);
                Value::Object(document).to_string().into_bytes()
            }
            _ => self.bytes.clone(),
        }
    }
}

/// Find the executable for `plugin_type` in `dirs`, first match wins
///
/// # Errors
/// Returns a message listing the searched directories if none has it
pub fn find_plugin(plugin_type: &str, dirs: &[PathBuf]) -> Result<PathBuf, String> {
    dirs.iter()
        .map(|dir| dir.join(plugin_type))
        .find(|candidate| {
            std::fs::metadata(candidate)
                .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        })
        .ok_or_else(|| {
            let searched: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
            format!("failed to find plugin {plugin_type:?} in path [{}]", searched.join(" "))
        })
}
