//! Dedicated namespace worker thread
//!
//! setns(2) changes the namespace of the calling OS thread only. The worker
//! owns one thread for its whole life, runs a current-thread runtime on it
//! and builds the orchestrator there, so every namespace switch and every
//! socket opened in a switched namespace stays on that thread. Callers on
//! any runtime queue requests to it and await the reply.

use std::thread::JoinHandle;

use cnibench_core::{BenchConfig, Error, PluginId, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::harness::{measure, TimingReport};
use crate::orchestrator::{Collaborators, IterationOptions, IterationReport, Orchestrator};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "cnibench-netns";

/// Pending requests; one runs at a time regardless
const QUEUE_DEPTH: usize = 16;

enum Request {
    Iterate {
        plugin: PluginId,
        options: IterationOptions,
        reply: oneshot::Sender<Result<IterationReport>>,
    },
    Benchmark {
        plugin: PluginId,
        iterations: usize,
        options: IterationOptions,
        reply: oneshot::Sender<Result<TimingReport>>,
    },
}

/// Handle on the namespace worker thread
#[derive(Debug)]
pub struct NetnsWorker {
    requests: Option<mpsc::Sender<Request>>,
    thread: Option<JoinHandle<()>>,
}

impl NetnsWorker {
    /// Start a worker driving the host collaborators described by `config`
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the worker cannot
    /// capture its namespace
    pub async fn start(config: &BenchConfig) -> Result<Self> {
        let config = config.clone();
        Self::start_with(move || Collaborators::host(&config)).await
    }

    /// Start a worker whose collaborators are built by `factory` on the
    /// worker thread itself
    ///
    /// # Errors
    /// Returns [`Error::Initialization`] if the thread or its runtime cannot
    /// be created, or the error of the factory or orchestrator construction
    pub async fn start_with<F>(factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Collaborators> + Send + 'static,
    {
        let (requests, queue) = mpsc::channel(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || serve(factory, queue, ready_tx))
            .map_err(|e| Error::Initialization {
                message: format!("spawning {WORKER_THREAD_NAME} thread failed: {e}"),
            })?;

        let mut worker = Self {
            requests: Some(requests),
            thread: Some(thread),
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(e)) => {
                worker.join();
                Err(e)
            }
            Err(_) => {
                worker.join();
                Err(Error::WorkerUnavailable)
            }
        }
    }

    /// Run one full lifecycle of `plugin` on the worker
    ///
    /// # Errors
    /// Returns the iteration's error, or [`Error::WorkerUnavailable`]
    pub async fn create_network(
        &self,
        plugin: &PluginId,
        options: IterationOptions,
    ) -> Result<IterationReport> {
        let (reply, response) = oneshot::channel();
        self.sender()?
            .send(Request::Iterate {
                plugin: plugin.clone(),
                options,
                reply,
            })
            .await?;
        response.await?
    }

    /// Run `iterations` lifecycles of `plugin` and collect timing samples
    ///
    /// # Errors
    /// Returns the first failing iteration's error, or [`Error::WorkerUnavailable`]
    pub async fn benchmark(
        &self,
        plugin: &PluginId,
        iterations: usize,
        options: IterationOptions,
    ) -> Result<TimingReport> {
        let (reply, response) = oneshot::channel();
        self.sender()?
            .send(Request::Benchmark {
                plugin: plugin.clone(),
                iterations,
                options,
                reply,
            })
            .await?;
        response.await?
    }

    /// Stop accepting requests, let the current one finish and join the thread
    ///
    /// # Errors
    /// Returns [`Error::WorkerUnavailable`] if the thread panicked
    pub async fn shutdown(mut self) -> Result<()> {
        self.requests = None;
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let joined = tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|_| Error::WorkerUnavailable)?;
        joined.map_err(|_| Error::WorkerUnavailable)
    }

    fn sender(&self) -> Result<&mpsc::Sender<Request>> {
        self.requests.as_ref().ok_or(Error::WorkerUnavailable)
    }

    fn join(&mut self) {
        self.requests = None;
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("{WORKER_THREAD_NAME} thread panicked");
        }
    }
}

impl Drop for NetnsWorker {
    fn drop(&mut self) {
        self.join();
    }
}

/// Body of the worker thread
fn serve<F>(
    factory: F,
    mut queue: mpsc::Receiver<Request>,
    ready: oneshot::Sender<Result<()>>,
) where
    F: FnOnce() -> Result<Collaborators>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(Error::Initialization {
                message: format!("building worker runtime failed: {e}"),
            }));
            return;
        }
    };

    runtime.block_on(async move {
        let mut orchestrator = match factory().and_then(Orchestrator::new) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        debug!(netns = %orchestrator.original().id(), "Namespace worker ready");

        while let Some(request) = queue.recv().await {
            // Requests run to completion even if the caller stopped waiting
            match request {
                Request::Iterate {
                    plugin,
                    options,
                    reply,
                } => {
                    let result = orchestrator.run_iteration(&plugin, options).await;
                    if reply.send(result).is_err() {
                        warn!(plugin = %plugin, "Iteration finished after its caller left");
                    }
                }
                Request::Benchmark {
                    plugin,
                    iterations,
                    options,
                    reply,
                } => {
                    let result = measure(&mut orchestrator, &plugin, iterations, options).await;
                    if reply.send(result).is_err() {
                        warn!(plugin = %plugin, "Benchmark finished after its caller left");
                    }
                }
            }
        }

        debug!("Namespace worker queue closed");
        // Dropping the orchestrator here releases the original namespace on this thread
        drop(orchestrator);
    });
}
