//! Link enumeration in the calling thread's network namespace

use std::fmt;

use cnibench_core::{Error, Result};
use futures::TryStreamExt;
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkInfo, LinkMessage};
use tracing::trace;

/// Kind reported for links without link info (physical devices, loopback)
pub const GENERIC_KIND: &str = "device";

/// One network interface as seen from inside a namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Interface index
    pub index: u32,
    /// Interface name
    pub name: String,
    /// Link kind (`veth`, `bridge`, `macvlan`, ... or `device`)
    pub kind: String,
}

impl Link {
    /// Build from an rtnetlink link message
    #[must_use]
    pub fn from_message(message: &LinkMessage) -> Self {
        let mut name = String::new();
        let mut kind = GENERIC_KIND.to_string();

        for attribute in &message.attributes {
            match attribute {
                LinkAttribute::IfName(ifname) => name.clone_from(ifname),
                LinkAttribute::LinkInfo(infos) => {
                    if let Some(found) = infos.iter().find_map(|info| match info {
                        LinkInfo::Kind(kind) => Some(kind_name(kind)),
                        _ => None,
                    }) {
                        kind = found;
                    }
                }
                _ => {}
            }
        }

        Self {
            index: message.header.index,
            name,
            kind,
        }
    }

    /// Whether this is the loopback interface
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        self.name == "lo"
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.kind, self.name)
    }
}

fn kind_name(kind: &InfoKind) -> String {
    match kind {
        InfoKind::Other(name) => name.clone(),
        known => format!("{known:?}").to_lowercase(),
    }
}

/// List the links of the namespace the calling thread is in
///
/// The netlink socket is bound to the namespace active when it is created,
/// so call this after switching namespaces and on the same thread.
///
/// # Errors
/// Returns [`Error::Diagnostic`] if the netlink dump fails
pub async fn list_links() -> Result<Vec<Link>> {
    let (connection, handle, _) = rtnetlink::new_connection().map_err(|e| Error::Diagnostic {
        message: format!("Failed to create netlink connection: {e}"),
    })?;
    let connection = tokio::spawn(connection);

    let dump = async {
        let mut links = Vec::new();
        let mut stream = std::pin::pin!(handle.link().get().execute());
        while let Some(message) = stream.try_next().await.map_err(|e| Error::Diagnostic {
            message: format!("Getting list of ip links failed: {e}"),
        })? {
            links.push(Link::from_message(&message));
        }
        Ok::<_, Error>(links)
    };
    let result = dump.await;

    connection.abort();

    if let Ok(ref links) = result {
        trace!(count = links.len(), "Listed links");
    }
    result
}
