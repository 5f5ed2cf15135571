//! Observational checks run inside an attached namespace
//!
//! Both checks run on the worker thread while the isolated namespace is
//! active. Their failures are reported but never fail an iteration.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use cnibench_core::config::MAX_TIMEOUT_SECS;
use cnibench_core::{BenchConfig, Error, Journal, Result};
use cnibench_namespace::{Link, MockNamespaces, NamespaceOps};
use tokio::sync::oneshot;
use tracing::debug;

/// Name of the short-lived thread carrying the outbound probe
pub const PROBE_THREAD_NAME: &str = "cnibench-probe";

/// Checks exercised inside the isolated namespace
#[async_trait]
pub trait Diagnostics: Send + Sync {
    /// Links visible in the calling thread's namespace
    ///
    /// # Errors
    /// Returns [`Error::Diagnostic`] on failure
    async fn list_links(&self) -> Result<Vec<Link>>;

    /// Outbound request through the calling thread's namespace; returns the
    /// response body with whitespace removed
    ///
    /// # Errors
    /// Returns [`Error::Diagnostic`] on failure
    async fn probe(&self) -> Result<String>;
}

/// Diagnostics against the kernel and the network
#[derive(Debug, Clone)]
pub struct HostDiagnostics {
    endpoint: String,
    timeout: Duration,
}

impl HostDiagnostics {
    /// Create diagnostics probing `endpoint`; `timeout` is capped at
    /// [`MAX_TIMEOUT_SECS`]
    #[must_use]
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: timeout.min(Duration::from_secs(MAX_TIMEOUT_SECS)),
        }
    }

    /// Create diagnostics from the benchmark configuration
    #[must_use]
    pub fn from_config(config: &BenchConfig) -> Self {
        Self::new(config.probe_endpoint.clone(), config.probe_timeout())
    }
}

#[async_trait]
impl Diagnostics for HostDiagnostics {
    async fn list_links(&self) -> Result<Vec<Link>> {
        cnibench_namespace::list_links().await
    }

    async fn probe(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        let endpoint = self.endpoint.clone();
        let timeout = self.timeout;

        // Threads inherit the creating thread's namespace, so the client and
        // its resolver threads all live in the isolated namespace
        std::thread::Builder::new()
            .name(PROBE_THREAD_NAME.to_string())
            .spawn(move || {
                let _ = tx.send(fetch(&endpoint, timeout));
            })
            .map_err(|e| Error::Diagnostic {
                message: format!("spawning probe thread failed: {e}"),
            })?;

        // The client timeout bounds the thread; this only covers a wedged resolver
        match tokio::time::timeout(timeout.saturating_mul(2), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Diagnostic {
                message: "probe thread exited without a result".to_string(),
            }),
            Err(_) => Err(Error::Diagnostic {
                message: format!("getting {} timed out", self.endpoint),
            }),
        }
    }
}

fn fetch(endpoint: &str, timeout: Duration) -> Result<String> {
    let failed = |e: reqwest::Error| Error::Diagnostic {
        message: format!("getting an out of network resource failed: {e}"),
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(failed)?;
    let body = client
        .get(endpoint)
        .send()
        .and_then(reqwest::blocking::Response::error_for_status)
        .map_err(failed)?
        .text()
        .map_err(|e| Error::Diagnostic {
            message: format!("reading response body failed: {e}"),
        })?;

    debug!(endpoint, bytes = body.len(), "Probe answered");
    Ok(compact(&body))
}

/// Strip all whitespace so a JSON body logs on one line
#[must_use]
pub fn compact(body: &str) -> String {
    body.chars().filter(|c| !c.is_whitespace()).collect()
}

#[derive(Debug, Default)]
struct MockDiagState {
    fail_links: bool,
    fail_probe: bool,
}

/// Mock diagnostics for testing (no netlink, no network)
///
/// Records `links <inode>` and `probe <inode>` with the inode of the mock
/// namespace active at call time, so tests can check where checks ran.
#[derive(Debug, Clone)]
pub struct MockDiagnostics {
    namespaces: MockNamespaces,
    state: Arc<Mutex<MockDiagState>>,
    journal: Journal,
}

impl MockDiagnostics {
    /// Create mock diagnostics observing `namespaces`
    #[must_use]
    pub fn new(namespaces: MockNamespaces, journal: Journal) -> Self {
        Self {
            namespaces,
            state: Arc::new(Mutex::new(MockDiagState::default())),
            journal,
        }
    }

    /// Make link enumeration fail
    pub fn fail_links(&self, fail: bool) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).fail_links = fail;
    }

    /// Make the outbound probe fail
    pub fn fail_probe(&self, fail: bool) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).fail_probe = fail;
    }

    fn record(&self, what: &str) -> Result<()> {
        let active = self.namespaces.active()?;
        self.journal.record(format!("{what} {}", active.inode()));
        Ok(())
    }
}

#[async_trait]
impl Diagnostics for MockDiagnostics {
    async fn list_links(&self) -> Result<Vec<Link>> {
        self.record("links")?;
        if self.state.lock().unwrap_or_else(PoisonError::into_inner).fail_links {
            return Err(Error::Diagnostic {
                message: "mock netlink dump failed".to_string(),
            });
        }

        Ok(vec![
            Link {
                index: 1,
                name: "lo".to_string(),
                kind: "device".to_string(),
            },
            Link {
                index: 3,
                name: "eth0".to_string(),
                kind: "veth".to_string(),
            },
        ])
    }

    async fn probe(&self) -> Result<String> {
        self.record("probe")?;
        if self.state.lock().unwrap_or_else(PoisonError::into_inner).fail_probe {
            return Err(Error::Diagnostic {
                message: "mock endpoint unreachable".to_string(),
            });
        }

        Ok(compact("{\n  \"origin\": \"10.88.0.2\"\n}\n"))
    }
}
