//! CNI attachment with pluggable backends
//!
//! This crate provides the plugin configuration catalog and a trait-based
//! abstraction over the CNI exec protocol, with production and mock
//! implementations.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod catalog;
pub mod client;
pub mod config;
pub mod result;

pub use backend::{AttachmentBackend, MockAttachment};
pub use client::{CniClient, CniCommand};
pub use config::NetworkConfig;
pub use result::{AttachmentResult, InterfaceConfig, IpConfig, PluginError};

// Re-export commonly used types
pub use cnibench_core::PluginId;
