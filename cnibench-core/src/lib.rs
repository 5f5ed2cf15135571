//! cnibench Core - shared vocabulary for the CNI benchmark workspace
//!
//! This crate provides the error type, identifiers, lifecycle phases and
//! configuration used by every other cnibench crate.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod events;
pub mod journal;
pub mod types;

pub use config::BenchConfig;
pub use error::{Error, Result};
pub use events::{LifecycleEvent, LifecycleState, Phase};
pub use journal::Journal;
pub use types::{PluginId, ProcessId};
