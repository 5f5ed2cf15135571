//! Attachment results
//!
//! Plugins print their result as JSON on stdout. Two shapes exist: the
//! current one (`interfaces` plus `ips` pointing at them by index) and the
//! legacy `ip4`/`ip6` one, which names no interface at all.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use cnibench_core::{Error, Result};
use ipnetwork::IpNetwork;
use serde::Deserialize;

/// One address assigned to an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpConfig {
    /// Address with prefix
    pub address: IpNetwork,
    /// Gateway, if the plugin reported one
    pub gateway: Option<IpAddr>,
}

impl IpConfig {
    /// The bare address
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    /// Prefix length of the address
    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.address.prefix()
    }
}

/// Configuration of one interface inside the namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Hardware address
    pub mac: Option<String>,
    /// Namespace path the interface lives in
    pub sandbox: String,
    /// Assigned addresses, in result order
    pub ip_configs: Vec<IpConfig>,
}

/// Merged result of attaching every configured network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentResult {
    /// Interfaces keyed by name
    pub interfaces: BTreeMap<String, InterfaceConfig>,
}

impl AttachmentResult {
    /// First address of `interface`
    ///
    /// # Errors
    /// Returns [`Error::MissingInterface`] if the interface is absent or
    /// has no address
    pub fn default_ip(&self, interface: &str) -> Result<&IpConfig> {
        self.interfaces
            .get(interface)
            .and_then(|config| config.ip_configs.first())
            .ok_or_else(|| Error::MissingInterface {
                interface: interface.to_string(),
            })
    }

    /// Merge one plugin's stdout into this result
    ///
    /// Interfaces without a sandbox belong to the host and are ignored.
    /// Legacy results are attributed to `ifname`, the interface the plugin
    /// was asked to create.
    ///
    /// # Errors
    /// Returns a message if the output is not a valid result
    pub fn merge_output(&mut self, ifname: &str, netns: &str, stdout: &[u8]) -> std::result::Result<(), String> {
        let raw: RawResult =
            serde_json::from_slice(stdout).map_err(|e| format!("invalid result: {e}"))?;

        if raw.interfaces.is_empty() && raw.ips.is_empty() {
            let legacy: Vec<&RawLegacyIp> = raw.ip4.iter().chain(raw.ip6.iter()).collect();
            if legacy.is_empty() {
                return Ok(());
            }

            let entry = self.interfaces.entry(ifname.to_string()).or_default();
            if entry.sandbox.is_empty() {
                entry.sandbox = netns.to_string();
            }
            for ip in legacy {
                entry.ip_configs.push(IpConfig {
                    address: parse_network(&ip.ip)?,
                    gateway: parse_gateway(ip.gateway.as_deref())?,
                });
            }
            return Ok(());
        }

        for (index, interface) in raw.interfaces.iter().enumerate() {
            let Some(sandbox) = interface.sandbox.as_deref().filter(|s| !s.is_empty()) else {
                continue;
            };

            let mut ip_configs = Vec::new();
            for ip in raw.ips.iter().filter(|ip| ip.interface == Some(index)) {
                ip_configs.push(IpConfig {
                    address: parse_network(&ip.address)?,
                    gateway: parse_gateway(ip.gateway.as_deref())?,
                });
            }

            self.interfaces.insert(
                interface.name.clone(),
                InterfaceConfig {
                    mac: interface.mac.clone().filter(|m| !m.is_empty()),
                    sandbox: sandbox.to_string(),
                    ip_configs,
                },
            );
        }

        Ok(())
    }
}

fn parse_network(raw: &str) -> std::result::Result<IpNetwork, String> {
    IpNetwork::from_str(raw).map_err(|e| format!("invalid address {raw:?}: {e}"))
}

fn parse_gateway(raw: Option<&str>) -> std::result::Result<Option<IpAddr>, String> {
    raw.filter(|g| !g.is_empty())
        .map(|g| IpAddr::from_str(g).map_err(|e| format!("invalid gateway {g:?}: {e}")))
        .transpose()
}

#[derive(Deserialize)]
struct RawResult {
    #[serde(default)]
    interfaces: Vec<RawInterface>,
    #[serde(default)]
    ips: Vec<RawIp>,
    ip4: Option<RawLegacyIp>,
    ip6: Option<RawLegacyIp>,
}

#[derive(Deserialize)]
struct RawInterface {
    name: String,
    mac: Option<String>,
    sandbox: Option<String>,
}

#[derive(Deserialize)]
struct RawIp {
    address: String,
    gateway: Option<String>,
    interface: Option<usize>,
}

#[derive(Deserialize)]
struct RawLegacyIp {
    ip: String,
    gateway: Option<String>,
}

/// Error object a failing plugin prints on stdout
#[derive(Debug, Clone, Deserialize)]
pub struct PluginError {
    /// Error code
    #[serde(default)]
    pub code: u32,
    /// Short message
    #[serde(default)]
    pub msg: String,
    /// Extra detail
    #[serde(default)]
    pub details: String,
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.details.is_empty() {
            write!(f, "{} (code {})", self.msg, self.code)
        } else {
            write!(f, "{}; {} (code {})", self.msg, self.details, self.code)
        }
    }
}
