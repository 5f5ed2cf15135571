//! Network namespace plumbing for the CNI benchmark
//!
//! This crate provides the kernel-facing leaves of a benchmark iteration:
//! - Namespace handles - capture, resolve by pid, activate and release
//! - Isolation processes - children anchoring a freshly unshared namespace
//! - Link enumeration - rtnetlink dump of the active namespace
//!
//! Every kernel-facing piece sits behind a trait with an in-memory mock
//! so the lifecycle above it can be tested without privileges.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod handle;
pub mod links;
pub mod mock;
pub mod process;

pub use handle::{HostNamespaces, NamespaceHandle, NamespaceId, NamespaceOps, THREAD_SELF_NETNS};
pub use links::{list_links, Link};
pub use mock::{mock_process_ns, MockNamespaces, MockProcess, MockSpawner, MOCK_ORIGINAL_NS};
pub use process::{IsolationProcess, ProcessSpawner, UnshareSpawner, UnsharedProcess};
