//! cnibench Runner - CNI plugin lifecycle orchestration and timing
//!
//! This crate composes the namespace, process and attachment pieces into
//! one plugin lifecycle:
//! - [`Orchestrator`] - one iteration with guaranteed cleanup
//! - [`NetnsWorker`] - owns the thread every namespace switch happens on
//! - [`measure`] - repeated iterations with attach and detach timed apart
//!
//! # Example
//! ```no_run
//! use cnibench_core::{BenchConfig, PluginId};
//! use cnibench_runner::{IterationOptions, NetnsWorker};
//!
//! # async fn example() -> cnibench_core::Result<()> {
//! let worker = NetnsWorker::start(&BenchConfig::default()).await?;
//! let plugin = PluginId::new("bridge")?;
//!
//! let report = worker.create_network(&plugin, IterationOptions::verbose()).await?;
//! println!("{} got {}", report.plugin, report.ip);
//!
//! let timings = worker.benchmark(&plugin, 10, IterationOptions::timing()).await?;
//! println!("attach: {}", timings.attach_summary());
//!
//! worker.shutdown().await
//! # }
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod diagnostics;
pub mod harness;
pub mod orchestrator;
pub mod worker;

pub use diagnostics::{Diagnostics, HostDiagnostics, MockDiagnostics};
pub use harness::{measure, Summary, TimedPhase, TimingReport};
pub use orchestrator::{Collaborators, IterationOptions, IterationReport, MockSet, Orchestrator};
pub use worker::NetnsWorker;
