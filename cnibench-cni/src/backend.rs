//! Attachment backend trait for pluggable implementations

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cnibench_core::{Error, Journal, PluginId, Result};
use ipnetwork::IpNetwork;
use tokio::sync::Mutex;

use crate::result::{AttachmentResult, InterfaceConfig, IpConfig};

/// Trait for network attachment backends
///
/// This allows for different implementations:
/// - [`CniClient`](crate::CniClient) - Production CNI exec protocol
/// - [`MockAttachment`] - Testing without plugin binaries
///
/// A backend holds at most one loaded configuration; `attach` and `detach`
/// apply to whatever was loaded last.
///
/// # Thread Safety
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait AttachmentBackend: Send + Sync {
    /// Interface the plugin is asked to create (`eth0` by default)
    fn interface(&self) -> &str;

    /// Load the configuration of `plugin`, replacing any previous one
    ///
    /// # Errors
    /// Returns [`Error::ConfigLoadFailed`] if the configuration is unusable
    async fn load_configuration(&self, plugin: &PluginId) -> Result<()>;

    /// Attach the namespace at `netns` to the loaded network (CNI ADD)
    ///
    /// # Errors
    /// Returns [`Error::AttachFailed`] if no configuration is loaded or the
    /// plugin fails
    async fn attach(&self, id: &str, netns: &Path) -> Result<AttachmentResult>;

    /// Detach the namespace at `netns` (CNI DEL)
    ///
    /// # Errors
    /// Returns [`Error::DetachFailed`] if the plugin fails
    async fn detach(&self, id: &str, netns: &Path) -> Result<()>;
}

/// Mock backend for testing (doesn't exec anything)
///
/// # Example
/// ```
/// use cnibench_cni::{AttachmentBackend, MockAttachment};
/// use cnibench_core::PluginId;
/// use std::path::Path;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let backend = MockAttachment::new();
/// let netns = Path::new("/proc/1000/ns/net");
///
/// backend.load_configuration(&PluginId::new("bridge").unwrap()).await.unwrap();
/// let result = backend.attach("1000", netns).await.unwrap();
/// assert!(result.default_ip("eth0").is_ok());
///
/// backend.detach("1000", netns).await.unwrap();
/// assert_eq!(backend.attached().await, 0);
/// # });
/// ```
#[derive(Clone)]
pub struct MockAttachment {
    interface: String,
    state: Arc<Mutex<MockState>>,
    journal: Journal,
}

#[derive(Default)]
struct MockState {
    loaded: Option<PluginId>,
    attached: HashSet<String>,
    loads: usize,
    attaches: usize,
    detaches: usize,
    fail_load: bool,
    fail_attach: bool,
    fail_detach: bool,
    omit_interface: bool,
}

impl MockAttachment {
    /// Create a new mock backend
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    /// Create a mock recording into a shared journal
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            interface: "eth0".to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
            journal,
        }
    }

    /// Make `load_configuration` fail
    pub async fn fail_load(&self, fail: bool) {
        self.state.lock().await.fail_load = fail;
    }

    /// Make `attach` fail
    pub async fn fail_attach(&self, fail: bool) {
        self.state.lock().await.fail_attach = fail;
    }

    /// Make `detach` fail (the attachment is still dropped)
    pub async fn fail_detach(&self, fail: bool) {
        self.state.lock().await.fail_detach = fail;
    }

    /// Leave the default interface out of attach results
    pub async fn omit_interface(&self, omit: bool) {
        self.state.lock().await.omit_interface = omit;
    }

    /// Number of attachments not detached yet (for testing)
    pub async fn attached(&self) -> usize {
        self.state.lock().await.attached.len()
    }

    /// Number of configuration loads (for testing)
    pub async fn loads(&self) -> usize {
        self.state.lock().await.loads
    }

    /// Number of successful attaches (for testing)
    pub async fn attaches(&self) -> usize {
        self.state.lock().await.attaches
    }

    /// Number of detach calls (for testing)
    pub async fn detaches(&self) -> usize {
        self.state.lock().await.detaches
    }

    fn result_for(&self, attach_number: usize, netns: &Path) -> AttachmentResult {
        let host = u8::try_from(attach_number % 250 + 2).unwrap_or(2);
        let ip = std::net::IpAddr::from([10, 88, 0, host]);
        let address = IpNetwork::new(ip, 16).unwrap_or_else(|_| IpNetwork::from(ip));

        let mut result = AttachmentResult::default();
        result.interfaces.insert(
            self.interface.clone(),
            InterfaceConfig {
                mac: Some(format!("0a:58:0a:58:00:{host:02x}")),
                sandbox: netns.display().to_string(),
                ip_configs: vec![IpConfig {
                    address,
                    gateway: Some([10, 88, 0, 1].into()),
                }],
            },
        );
        result
    }
}

impl Default for MockAttachment {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAttachment")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AttachmentBackend for MockAttachment {
    fn interface(&self) -> &str {
        &self.interface
    }

    async fn load_configuration(&self, plugin: &PluginId) -> Result<()> {
        let mut state = self.state.lock().await;
        self.journal.record(format!("load {plugin}"));

        if state.fail_load {
            state.loaded = None;
            return Err(Error::ConfigLoadFailed {
                plugin: plugin.clone(),
                message: "mock configuration unreadable".to_string(),
            });
        }

        state.loaded = Some(plugin.clone());
        state.loads += 1;

        tracing::debug!(plugin = %plugin, "Mock: Loaded configuration");

        Ok(())
    }

    async fn attach(&self, id: &str, netns: &Path) -> Result<AttachmentResult> {
        let mut state = self.state.lock().await;
        self.journal.record(format!("attach {id}"));

        let failed = |message: &str| Error::AttachFailed {
            id: id.to_string(),
            netns: netns.to_path_buf(),
            message: message.to_string(),
        };

        if state.loaded.is_none() {
            return Err(failed("no configuration loaded"));
        }
        if state.fail_attach {
            return Err(failed("mock plugin exited with status 1"));
        }

        state.attaches += 1;
        state.attached.insert(id.to_string());

        tracing::debug!(id, netns = %netns.display(), "Mock: Attached");

        if state.omit_interface {
            return Ok(AttachmentResult::default());
        }
        Ok(self.result_for(state.attaches, netns))
    }

    async fn detach(&self, id: &str, netns: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        self.journal.record(format!("detach {id}"));

        state.detaches += 1;
        state.attached.remove(id);

        if state.fail_detach {
            return Err(Error::DetachFailed {
                id: id.to_string(),
                netns: netns.to_path_buf(),
                message: "mock plugin exited with status 1".to_string(),
            });
        }

        tracing::debug!(id, remaining = state.attached.len(), "Mock: Detached");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn netns() -> &'static Path {
        Path::new("/proc/1000/ns/net")
    }

    #[tokio::test]
    async fn test_mock_attachment_lifecycle() {
        let journal = Journal::new();
        let backend = MockAttachment::with_journal(journal.clone());

        backend
            .load_configuration(&PluginId::new("bridge").unwrap())
            .await
            .unwrap();
        let result = backend.attach("1000", netns()).await.unwrap();
        assert_eq!(result.default_ip("eth0").unwrap().prefix_len(), 16);
        assert_eq!(backend.attached().await, 1);

        backend.detach("1000", netns()).await.unwrap();
        assert_eq!(backend.attached().await, 0);
        assert_eq!(journal.entries(), ["load bridge", "attach 1000", "detach 1000"]);
    }

    #[tokio::test]
    async fn test_mock_attach_requires_configuration() {
        let backend = MockAttachment::new();

        let err = backend.attach("1", netns()).await.unwrap_err();
        assert!(matches!(err, Error::AttachFailed { .. }));
        assert_eq!(backend.attaches().await, 0);
    }

    #[tokio::test]
    async fn test_mock_failed_load_clears_configuration() {
        let backend = MockAttachment::new();
        let plugin = PluginId::new("macvlan").unwrap();

        backend.load_configuration(&plugin).await.unwrap();
        backend.fail_load(true).await;
        assert!(backend.load_configuration(&plugin).await.is_err());
        assert!(backend.attach("1", netns()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_omit_interface() {
        let backend = MockAttachment::new();
        backend.omit_interface(true).await;
        backend
            .load_configuration(&PluginId::new("ptp").unwrap())
            .await
            .unwrap();

        let result = backend.attach("7", netns()).await.unwrap();
        assert!(matches!(
            result.default_ip(backend.interface()),
            Err(Error::MissingInterface { .. })
        ));
        assert_eq!(backend.attached().await, 1);
    }

    #[tokio::test]
    async fn test_mock_addresses_differ_per_attach() {
        let backend = MockAttachment::new();
        backend
            .load_configuration(&PluginId::new("bridge").unwrap())
            .await
            .unwrap();

        let first = backend.attach("1", netns()).await.unwrap();
        let second = backend.attach("2", netns()).await.unwrap();
        assert_ne!(
            first.default_ip("eth0").unwrap().ip(),
            second.default_ip("eth0").unwrap().ip()
        );
    }
}
