//! CNI exec protocol client
//!
//! Plugins are external binaries. Each invocation gets the command and the
//! target in `CNI_*` environment variables and the network configuration on
//! stdin, and prints a result (or an error object) on stdout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cnibench_core::{BenchConfig, Error, PluginId, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::AttachmentBackend;
use crate::config::{find_plugin, NetworkConfig, LOOPBACK_INTERFACE, LOOPBACK_TYPE};
use crate::result::{AttachmentResult, PluginError};

/// Spawn attempts while the binary is still open for writing elsewhere
const EXEC_ATTEMPTS: u32 = 5;

const EXEC_RETRY_DELAY: Duration = Duration::from_millis(20);

/// CNI command verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniCommand {
    /// Attach a container to a network
    Add,
    /// Detach a container from a network
    Del,
}

impl CniCommand {
    /// Value of `CNI_COMMAND`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Del => "DEL",
        }
    }
}

/// A network ready to invoke: configuration, binary and interface
#[derive(Debug, Clone)]
struct Network {
    config: NetworkConfig,
    binary: PathBuf,
    ifname: String,
}

#[derive(Debug)]
struct Loaded {
    plugin: PluginId,
    /// Invocation order for ADD; DEL walks it backwards
    networks: Vec<Network>,
}

/// Production attachment backend speaking the CNI exec protocol
#[derive(Debug)]
pub struct CniClient {
    conf_dir: PathBuf,
    plugin_dirs: Vec<PathBuf>,
    ifname: String,
    loopback: bool,
    timeout: Duration,
    loaded: Mutex<Option<Arc<Loaded>>>,
    /// ADD output per (container id, network), replayed as `prevResult` on DEL
    added: std::sync::Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl CniClient {
    /// Create a client from the benchmark configuration
    #[must_use]
    pub fn new(config: &BenchConfig) -> Self {
        Self {
            conf_dir: config.conf_dir.clone(),
            plugin_dirs: config.plugin_dirs.clone(),
            ifname: config.default_interface(),
            loopback: config.loopback,
            timeout: config.plugin_timeout(),
            loaded: Mutex::new(None),
            added: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Plugin whose configuration is loaded, if any
    pub async fn loaded_plugin(&self) -> Option<PluginId> {
        self.loaded
            .lock()
            .await
            .as_ref()
            .map(|loaded| loaded.plugin.clone())
    }

    fn cni_path(&self) -> String {
        self.plugin_dirs
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }

    async fn current(&self) -> Option<Arc<Loaded>> {
        self.loaded.lock().await.clone()
    }

    fn remember(&self, id: &str, network: &Network, stdout: Vec<u8>) {
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((id.to_string(), network.config.name.clone()), stdout);
    }

    /// Configuration for a DEL, with the cached ADD result where the version wants it
    fn del_document(&self, id: &str, network: &Network) -> Vec<u8> {
        let added = self
            .added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(id.to_string(), network.config.name.clone()));

        added.map_or_else(
            || network.config.bytes().to_vec(),
            |stdout| network.config.with_prev_result(&stdout),
        )
    }

    /// Run one plugin invocation with `stdin` and return its stdout
    async fn exec(
        &self,
        network: &Network,
        command: CniCommand,
        id: &str,
        netns: &Path,
        stdin: &[u8],
    ) -> std::result::Result<Vec<u8>, String> {
        debug!(
            command = command.as_str(),
            plugin = %network.config.plugin_type,
            network = %network.config.name,
            ifname = %network.ifname,
            id,
            "Invoking CNI plugin"
        );

        let invocation = async {
            let mut plugin = Command::new(&network.binary);
            plugin
                .env("CNI_COMMAND", command.as_str())
                .env("CNI_CONTAINERID", id)
                .env("CNI_NETNS", netns)
                .env("CNI_IFNAME", &network.ifname)
                .env("CNI_PATH", self.cni_path())
                .env("CNI_ARGS", "")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            let mut child = spawn_plugin(&mut plugin)
                .await
                .map_err(|e| format!("exec {} failed: {e}", network.binary.display()))?;

            if let Some(mut pipe) = child.stdin.take() {
                // A plugin may exit before reading its configuration
                if let Err(e) = pipe.write_all(stdin).await
                    && e.kind() != std::io::ErrorKind::BrokenPipe
                {
                    return Err(format!("writing plugin stdin failed: {e}"));
                }
            }

            child
                .wait_with_output()
                .await
                .map_err(|e| format!("waiting for plugin failed: {e}"))
        };

        let output = timeout(self.timeout, invocation)
            .await
            .map_err(|_| {
                format!(
                    "plugin type={:?} timed out after {:?}",
                    network.config.plugin_type, self.timeout
                )
            })??;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let reason = serde_json::from_slice::<PluginError>(&output.stdout).map_or_else(
            |_| {
                let stderr = String::from_utf8_lossy(&output.stderr);
                format!("{} ({})", output.status, stderr.trim())
            },
            |err| err.to_string(),
        );

        Err(format!(
            "plugin type={:?} name={:?} failed ({}): {reason}",
            network.config.plugin_type,
            network.config.name,
            command.as_str().to_lowercase()
        ))
    }
}

/// Spawn a plugin, retrying while exec(2) reports ETXTBSY
async fn spawn_plugin(command: &mut Command) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        match command.spawn() {
            Err(e)
                if e.kind() == std::io::ErrorKind::ExecutableFileBusy && attempt < EXEC_ATTEMPTS =>
            {
                attempt += 1;
                tokio::time::sleep(EXEC_RETRY_DELAY).await;
            }
            result => return result,
        }
    }
}

#[async_trait]
impl AttachmentBackend for CniClient {
    fn interface(&self) -> &str {
        &self.ifname
    }

    async fn load_configuration(&self, plugin: &PluginId) -> Result<()> {
        let mut slot = self.loaded.lock().await;
        // A failed load never leaves the previous plugin active
        *slot = None;
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let failed = |message: String| Error::ConfigLoadFailed {
            plugin: plugin.clone(),
            message,
        };

        let path = self.conf_dir.join(plugin.conf_file_name());
        let config = NetworkConfig::load(&path).await.map_err(failed)?;
        let binary = find_plugin(&config.plugin_type, &self.plugin_dirs).map_err(failed)?;

        let mut networks = Vec::with_capacity(2);
        if self.loopback {
            let lo = NetworkConfig::loopback(&config.cni_version);
            networks.push(Network {
                binary: find_plugin(LOOPBACK_TYPE, &self.plugin_dirs).map_err(failed)?,
                config: lo,
                ifname: LOOPBACK_INTERFACE.to_string(),
            });
        }

        info!(
            plugin = %plugin,
            network = %config.name,
            plugin_type = %config.plugin_type,
            binary = %binary.display(),
            "Loaded CNI configuration"
        );

        networks.push(Network {
            config,
            binary,
            ifname: self.ifname.clone(),
        });

        *slot = Some(Arc::new(Loaded {
            plugin: plugin.clone(),
            networks,
        }));
        Ok(())
    }

    async fn attach(&self, id: &str, netns: &Path) -> Result<AttachmentResult> {
        let failed = |message: String| Error::AttachFailed {
            id: id.to_string(),
            netns: netns.to_path_buf(),
            message,
        };

        let loaded = self
            .current()
            .await
            .ok_or_else(|| failed("no configuration loaded".to_string()))?;

        let netns_str = netns.display().to_string();
        let mut result = AttachmentResult::default();

        for (done, network) in loaded.networks.iter().enumerate() {
            let outcome = match self
                .exec(network, CniCommand::Add, id, netns, network.config.bytes())
                .await
            {
                Ok(stdout) => result
                    .merge_output(&network.ifname, &netns_str, &stdout)
                    .map(|()| stdout),
                Err(message) => Err(message),
            };

            match outcome {
                Ok(stdout) => self.remember(id, network, stdout),
                Err(message) => {
                    // Undo the networks already added; the caller will not detach
                    for previous in loaded.networks[..done].iter().rev() {
                        let document = self.del_document(id, previous);
                        if let Err(e) = self
                            .exec(previous, CniCommand::Del, id, netns, &document)
                            .await
                        {
                            warn!(id, network = %previous.config.name, error = %e, "Rollback DEL failed");
                        }
                    }
                    return Err(failed(message));
                }
            }
        }

        Ok(result)
    }

    async fn detach(&self, id: &str, netns: &Path) -> Result<()> {
        let loaded = self.current().await.ok_or_else(|| Error::DetachFailed {
            id: id.to_string(),
            netns: netns.to_path_buf(),
            message: "no configuration loaded".to_string(),
        })?;

        // Every network gets its DEL even if an earlier one fails
        let mut first_error = None;
        for network in loaded.networks.iter().rev() {
            let document = self.del_document(id, network);
            if let Err(message) = self
                .exec(network, CniCommand::Del, id, netns, &document)
                .await
            {
                warn!(id, network = %network.config.name, error = %message, "DEL failed");
                first_error.get_or_insert(message);
            }
        }

        match first_error {
            None => Ok(()),
            Some(message) => Err(Error::DetachFailed {
                id: id.to_string(),
                netns: netns.to_path_buf(),
                message,
            }),
        }
    }
}
