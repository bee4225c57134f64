//! # Node Registry
//!
//! Admission of new nodes into the three-stage pipeline:
//!
//! ```text
//! unknown ──addNode──▶ buffered ──sync──▶ queued ··admin··▶ confirmed
//! ```
//!
//! [`NodeRegistry::add_node`] is the only way into `buffered`. It refuses to
//! buffer an address that is already confirmed or queued, and it refuses an
//! address it cannot reach. Promotion to `queued` belongs to
//! [`GossipSync`](super::gossip::GossipSync). Promotion to `confirmed` is an
//! administrative action outside this crate ([`NodeRegistry::seed_confirmed`]
//! is its hook).
//!
//! The registry also answers the read-only questions peers ask: what is in
//! the queue, and what does the confirmed set hash to.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::peer::{peer_url, PeerClient, PeerError, QueueEntry};
use crate::config::{PEER_PROBE_TIMEOUT, PING_PATH};
use crate::crypto::hash::sha256_hex;
use crate::storage::{NodeRecord, NodeStore, NodeTable, StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub const MSG_ALREADY_CONFIRMED: &str = "IP is already in the nodes database";
pub const MSG_ALREADY_QUEUED: &str = "IP is already in the nodes queue";
pub const MSG_BUFFERED: &str = "IP successfully added to nodes buffer";
pub const MSG_POST_ONLY: &str = "Only POST requests are allowed";
pub const MSG_ADDRESS_REQUIRED: &str = "IP address is required";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Whether an admission call is a creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMethod {
    /// An HTTP POST, or anything else that means "create".
    Create,
    Other,
}

/// Where an address stands after an admission call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionReport {
    pub message: String,
    pub in_nodes: bool,
    pub in_nodes_que: bool,
    pub in_nodes_buffer: bool,
}

/// Reasons an admission call produced no report.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{}", MSG_POST_ONLY)]
    MethodNotAllowed,

    #[error("{}", MSG_ADDRESS_REQUIRED)]
    MissingAddress,

    #[error("{0}")]
    PeerUnreachable(PeerError),

    #[error("failed to verify {0} in nodes buffer")]
    NotBuffered(String),

    #[error("node database error: {0}")]
    Store(#[from] StoreError),
}

impl RegistryError {
    /// The HTTP-style status code reported alongside the message.
    pub fn code(&self) -> u16 {
        match self {
            RegistryError::MethodNotAllowed => 405,
            RegistryError::MissingAddress => 400,
            RegistryError::PeerUnreachable(_) => 502,
            RegistryError::NotBuffered(_) | RegistryError::Store(_) => 500,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// Admission pipeline over a node store and a peer client.
pub struct NodeRegistry<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    peers: Arc<P>,
    probe_timeout: Duration,
}

impl<S: ?Sized, P: ?Sized> Clone for NodeRegistry<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            peers: Arc::clone(&self.peers),
            probe_timeout: self.probe_timeout,
        }
    }
}

impl<S, P> NodeRegistry<S, P>
where
    S: NodeStore + ?Sized,
    P: PeerClient + ?Sized,
{
    pub fn new(store: Arc<S>, peers: Arc<P>) -> Self {
        Self {
            store,
            peers,
            probe_timeout: PEER_PROBE_TIMEOUT,
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Admit `ip_address` into the buffer.
    ///
    /// Order matters: method, then address, then liveness, then membership.
    /// Membership checks run confirmed-first, and the first hit returns
    /// without writing anything.
    pub async fn add_node(
        &self,
        method: AdmissionMethod,
        ip_address: &str,
    ) -> Result<AdmissionReport, RegistryError> {
        if method != AdmissionMethod::Create {
            return Err(RegistryError::MethodNotAllowed);
        }

        let ip = ip_address.trim();
        if ip.is_empty() {
            return Err(RegistryError::MissingAddress);
        }

        self.probe(ip).await.map_err(|e| {
            warn!(ip = %ip, error = %e, "admission probe failed");
            RegistryError::PeerUnreachable(e)
        })?;

        if self.store.contains_node(NodeTable::Confirmed, ip)? {
            debug!(ip = %ip, "already confirmed");
            return Ok(AdmissionReport {
                message: MSG_ALREADY_CONFIRMED.to_string(),
                in_nodes: true,
                in_nodes_que: false,
                in_nodes_buffer: false,
            });
        }

        if self.store.contains_node(NodeTable::Queued, ip)? {
            debug!(ip = %ip, "already queued");
            return Ok(AdmissionReport {
                message: MSG_ALREADY_QUEUED.to_string(),
                in_nodes: false,
                in_nodes_que: true,
                in_nodes_buffer: false,
            });
        }

        self.store
            .insert_node(NodeTable::Buffered, &NodeRecord::new(ip))?;

        // A concurrent sync may already have promoted the row into the queue.
        let in_nodes_buffer = self.store.contains_node(NodeTable::Buffered, ip)?;
        let in_nodes_que = !in_nodes_buffer && self.store.contains_node(NodeTable::Queued, ip)?;
        if !in_nodes_buffer && !in_nodes_que {
            return Err(RegistryError::NotBuffered(ip.to_string()));
        }

        info!(ip = %ip, "node buffered");
        Ok(AdmissionReport {
            message: MSG_BUFFERED.to_string(),
            in_nodes: false,
            in_nodes_que,
            in_nodes_buffer,
        })
    }

    /// Liveness probe bounded by the configured timeout.
    async fn probe(&self, ip: &str) -> Result<(), PeerError> {
        match tokio::time::timeout(self.probe_timeout, self.peers.ping(ip)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(PeerError::Timeout {
                url: peer_url(ip, PING_PATH),
            }),
        }
    }

    /// Insert `ip_address` directly into the confirmed set. Returns `false`
    /// if it was already there.
    pub fn seed_confirmed(&self, ip_address: &str) -> StoreResult<bool> {
        let inserted = self
            .store
            .insert_node(NodeTable::Confirmed, &NodeRecord::new(ip_address.trim()))?;
        if inserted {
            info!(ip = %ip_address, "confirmed node seeded");
        }
        Ok(inserted)
    }

    pub fn nodes(&self, table: NodeTable) -> StoreResult<Vec<NodeRecord>> {
        self.store.list_nodes(table)
    }

    /// The queue as served to peers.
    pub fn queue(&self) -> StoreResult<Vec<QueueEntry>> {
        Ok(self
            .store
            .list_nodes(NodeTable::Queued)?
            .into_iter()
            .map(|n| QueueEntry::new(n.ip_address))
            .collect())
    }

    /// SHA-256 over the confirmed set, one
    /// `sort_order|computer_id|ip_address|node_group` line per node in
    /// table order. Two nodes with the same confirmed view and the same
    /// shard assignment report the same digest.
    pub fn confirmed_digest(&self) -> StoreResult<String> {
        let nodes = self.store.list_nodes(NodeTable::Confirmed)?;
        Ok(digest_nodes(&nodes))
    }
}

/// Digest of an already-ordered node list.
pub fn digest_nodes(nodes: &[NodeRecord]) -> String {
    let rendered = nodes
        .iter()
        .map(|n| {
            format!(
                "{}|{}|{}|{}",
                n.sort_order, n.computer_id, n.ip_address, n.node_group
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    sha256_hex(rendered.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::ScriptedPeers;
    use crate::storage::MemoryStore;

    fn registry(peers: ScriptedPeers) -> (Arc<MemoryStore>, NodeRegistry<MemoryStore, ScriptedPeers>) {
        let store = Arc::new(MemoryStore::new());
        let registry = NodeRegistry::new(Arc::clone(&store), Arc::new(peers))
            .with_probe_timeout(Duration::from_secs(1));
        (store, registry)
    }

    // -- 1. Request validation ------------------------------------------------

    #[tokio::test]
    async fn non_create_method_is_rejected() {
        let (_, registry) = registry(ScriptedPeers::new().alive("10.0.0.1:80"));
        let err = registry
            .add_node(AdmissionMethod::Other, "10.0.0.1:80")
            .await
            .unwrap_err();
        assert_eq!(err.code(), 405);
        assert_eq!(err.to_string(), MSG_POST_ONLY);
    }

    #[tokio::test]
    async fn empty_address_is_rejected() {
        let (_, registry) = registry(ScriptedPeers::new());
        let err = registry.add_node(AdmissionMethod::Create, "  ").await.unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[tokio::test]
    async fn unreachable_candidate_is_not_buffered() {
        let (store, registry) = registry(ScriptedPeers::new());
        let err = registry
            .add_node(AdmissionMethod::Create, "10.0.0.7:80")
            .await
            .unwrap_err();
        assert_eq!(err.code(), 502);
        assert!(store.list_nodes(NodeTable::Buffered).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_candidate_times_out() {
        let (_, registry) = registry(ScriptedPeers::new().hanging("10.0.0.8:80"));
        let err = registry
            .add_node(AdmissionMethod::Create, "10.0.0.8:80")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::PeerUnreachable(PeerError::Timeout { .. })
        ));
    }

    // -- 2. Membership --------------------------------------------------------

    #[tokio::test]
    async fn new_address_is_buffered() {
        let (store, registry) = registry(ScriptedPeers::new().alive("10.0.0.1:80"));
        let report = registry
            .add_node(AdmissionMethod::Create, "10.0.0.1:80")
            .await
            .unwrap();
        assert_eq!(report.message, MSG_BUFFERED);
        assert!(report.in_nodes_buffer);
        assert!(!report.in_nodes && !report.in_nodes_que);
        assert_eq!(store.list_nodes(NodeTable::Buffered).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirmed_address_short_circuits_twice() {
        let (store, registry) = registry(ScriptedPeers::new().alive("10.0.0.1:80"));
        registry.seed_confirmed("10.0.0.1:80").unwrap();

        for _ in 0..2 {
            let report = registry
                .add_node(AdmissionMethod::Create, "10.0.0.1:80")
                .await
                .unwrap();
            assert!(report.in_nodes);
            assert_eq!(report.message, MSG_ALREADY_CONFIRMED);
        }
        assert!(store.list_nodes(NodeTable::Buffered).unwrap().is_empty());
        assert!(store.list_nodes(NodeTable::Queued).unwrap().is_empty());
    }

    #[tokio::test]
    async fn queued_address_is_reported_as_queued() {
        let (store, registry) = registry(ScriptedPeers::new().alive("10.0.0.2:80"));
        store
            .insert_node(NodeTable::Queued, &NodeRecord::new("10.0.0.2:80"))
            .unwrap();

        let report = registry
            .add_node(AdmissionMethod::Create, "10.0.0.2:80")
            .await
            .unwrap();
        assert!(report.in_nodes_que);
        assert!(!report.in_nodes_buffer);
        assert_eq!(report.message, MSG_ALREADY_QUEUED);
    }

    #[tokio::test]
    async fn buffering_twice_is_idempotent() {
        let (store, registry) = registry(ScriptedPeers::new().alive("10.0.0.3:80"));
        for _ in 0..2 {
            let report = registry
                .add_node(AdmissionMethod::Create, "10.0.0.3:80")
                .await
                .unwrap();
            assert!(report.in_nodes_buffer);
        }
        assert_eq!(store.list_nodes(NodeTable::Buffered).unwrap().len(), 1);
    }

    // -- 3. Read side ---------------------------------------------------------

    #[test]
    fn queue_lists_queued_addresses() {
        let (store, registry) = registry(ScriptedPeers::new());
        store
            .insert_node(NodeTable::Queued, &NodeRecord::new("10.0.0.4:80"))
            .unwrap();
        assert_eq!(registry.queue().unwrap(), vec![QueueEntry::new("10.0.0.4:80")]);
    }

    #[test]
    fn digest_tracks_confirmed_contents() {
        let (_, registry) = registry(ScriptedPeers::new());
        let empty = registry.confirmed_digest().unwrap();
        assert_eq!(empty, sha256_hex(b""));

        registry.seed_confirmed("10.0.0.5:80").unwrap();
        let one = registry.confirmed_digest().unwrap();
        assert_ne!(empty, one);
        assert_eq!(one, registry.confirmed_digest().unwrap());
    }

    #[test]
    fn digest_line_format() {
        let mut node = NodeRecord::new("h:1");
        node.sort_order = 2;
        node.node_group = 1;
        let expected = sha256_hex(format!("2|{}|h:1|1", node.computer_id).as_bytes());
        assert_eq!(digest_nodes(&[node]), expected);
    }
}
