//! # Gossip Sync
//!
//! One gossip cycle, run periodically or on demand, in three phases:
//!
//! 1. **Promotion**: every buffered node moves into the queue, atomically.
//! 2. **Liveness sweep**: every confirmed node is probed and its
//!    `reachable` flag updated.
//! 3. **Queue reconciliation**: every reachable confirmed node is asked for
//!    its queue, and each entry is merged into the local queue.
//!
//! Nodes converge on the union of everyone's pending candidates through many
//! independent pairwise merges. There is no coordinator.
//!
//! ## Failure model
//!
//! - Phases are independent. A store error in one phase is recorded in the
//!   [`SyncReport`] and the next phase still runs. Nothing already committed
//!   is rolled back.
//! - Within a phase, each peer is independent. A dead peer is marked
//!   unreachable and the sweep moves on.
//! - Every outbound call is bounded by `probe_timeout`, and at most
//!   `max_concurrency` calls are in flight. One stalled peer costs one
//!   timeout, not a stalled cycle.
//! - Nothing is retried within a cycle. The next cycle is the retry.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::peer::{peer_url, PeerClient, PeerError, QueueEntry};
use crate::config::{MAX_CONCURRENT_PROBES, PEER_PROBE_TIMEOUT, PING_PATH, QUEUE_PATH};
use crate::storage::{NodeRecord, NodeStore, NodeTable};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables for a gossip cycle.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Deadline for each outbound peer call.
    pub probe_timeout: Duration,
    /// Maximum peer calls in flight per phase.
    pub max_concurrency: usize,
    /// Skip remote queue entries that are already confirmed locally.
    pub dedup_confirmed: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            probe_timeout: PEER_PROBE_TIMEOUT,
            max_concurrency: MAX_CONCURRENT_PROBES,
            dedup_confirmed: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Rows moved from buffer to queue.
    pub promoted: usize,
    /// Confirmed nodes probed.
    pub probed: usize,
    pub reachable: usize,
    pub unreachable: usize,
    /// Peers whose queue was fetched successfully.
    pub peers_reconciled: usize,
    /// New rows added to the local queue.
    pub merged: usize,
    /// Remote entries skipped because they are already confirmed here.
    pub skipped_confirmed: usize,
    /// Store failures, as `"<phase>: <error>"` or `"<phase>: <peer>: <error>"`.
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct PeerMerge {
    fetched: bool,
    merged: usize,
    skipped_confirmed: usize,
    errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// GossipSync
// ---------------------------------------------------------------------------

/// Runs gossip cycles against one store and one peer client.
pub struct GossipSync<S: ?Sized, P: ?Sized> {
    store: Arc<S>,
    peers: Arc<P>,
    config: GossipConfig,
}

impl<S: ?Sized, P: ?Sized> Clone for GossipSync<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            peers: Arc::clone(&self.peers),
            config: self.config.clone(),
        }
    }
}

impl<S, P> GossipSync<S, P>
where
    S: NodeStore + ?Sized,
    P: PeerClient + ?Sized,
{
    pub fn new(store: Arc<S>, peers: Arc<P>, config: GossipConfig) -> Self {
        Self {
            store,
            peers,
            config,
        }
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Run promotion, liveness sweep and reconciliation, in that order.
    pub async fn sync_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();

        match self.store.promote_buffer() {
            Ok(moved) => {
                report.promoted = moved;
                if moved > 0 {
                    info!(moved, "buffer promoted to queue");
                }
            }
            Err(e) => {
                warn!(error = %e, "promotion failed");
                report.errors.push(format!("promotion: {e}"));
            }
        }

        self.liveness_sweep(&mut report).await;
        self.reconcile_queues(&mut report).await;

        info!(
            promoted = report.promoted,
            reachable = report.reachable,
            unreachable = report.unreachable,
            merged = report.merged,
            errors = report.errors.len(),
            "gossip cycle complete"
        );
        report
    }

    /// Phase 2: probe every confirmed node and record the result.
    pub async fn liveness_sweep(&self, report: &mut SyncReport) {
        let nodes = match self.store.list_nodes(NodeTable::Confirmed) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "liveness sweep could not list nodes");
                report.errors.push(format!("liveness: {e}"));
                return;
            }
        };

        let results: Vec<(NodeRecord, bool, Option<String>)> = stream::iter(nodes)
            .map(|node| async move {
                let alive = match self.ping(&node.ip_address).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(ip = %node.ip_address, error = %e, "peer unreachable");
                        false
                    }
                };
                let store_error = self
                    .store
                    .set_reachable(&node.computer_id, alive)
                    .err()
                    .map(|e| format!("liveness: {}: {e}", node.ip_address));
                (node, alive, store_error)
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for (node, alive, store_error) in results {
            report.probed += 1;
            if alive {
                report.reachable += 1;
            } else {
                report.unreachable += 1;
            }
            if let Some(err) = store_error {
                warn!(ip = %node.ip_address, error = %err, "reachability update failed");
                report.errors.push(err);
            }
        }
    }

    /// Phase 3: pull and merge the queues of reachable peers.
    pub async fn reconcile_queues(&self, report: &mut SyncReport) {
        let peers: Vec<NodeRecord> = match self.store.list_nodes(NodeTable::Confirmed) {
            Ok(nodes) => nodes.into_iter().filter(|n| n.reachable).collect(),
            Err(e) => {
                warn!(error = %e, "reconciliation could not list nodes");
                report.errors.push(format!("reconciliation: {e}"));
                return;
            }
        };

        let merges: Vec<PeerMerge> = stream::iter(peers)
            .map(|peer| self.reconcile_peer(peer))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for merge in merges {
            if merge.fetched {
                report.peers_reconciled += 1;
            }
            report.merged += merge.merged;
            report.skipped_confirmed += merge.skipped_confirmed;
            report.errors.extend(merge.errors);
        }
    }

    async fn reconcile_peer(&self, peer: NodeRecord) -> PeerMerge {
        let entries = match self.fetch_queue(&peer.ip_address).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(ip = %peer.ip_address, error = %e, "queue fetch failed");
                let mut merge = PeerMerge::default();
                if let Err(e) = self.store.set_reachable(&peer.computer_id, false) {
                    warn!(ip = %peer.ip_address, error = %e, "reachability update failed");
                    merge
                        .errors
                        .push(format!("reconciliation: {}: {e}", peer.ip_address));
                }
                return merge;
            }
        };

        let mut merge = PeerMerge {
            fetched: true,
            ..PeerMerge::default()
        };
        for entry in entries {
            let ip = entry.ip_address.trim();
            if ip.is_empty() {
                continue;
            }
            if self.config.dedup_confirmed {
                match self.store.contains_node(NodeTable::Confirmed, ip) {
                    Ok(true) => {
                        merge.skipped_confirmed += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(ip = %ip, error = %e, "confirmed lookup failed");
                        merge
                            .errors
                            .push(format!("reconciliation: {}: {e}", peer.ip_address));
                        continue;
                    }
                }
            }
            match self.store.insert_node(NodeTable::Queued, &NodeRecord::new(ip)) {
                Ok(true) => merge.merged += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(ip = %ip, from = %peer.ip_address, error = %e, "queue merge failed");
                    merge
                        .errors
                        .push(format!("reconciliation: {}: {e}", peer.ip_address));
                }
            }
        }
        debug!(peer = %peer.ip_address, merged = merge.merged, "queue reconciled");
        merge
    }

    async fn ping(&self, addr: &str) -> Result<(), PeerError> {
        match tokio::time::timeout(self.config.probe_timeout, self.peers.ping(addr)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(PeerError::Timeout {
                url: peer_url(addr, PING_PATH),
            }),
        }
    }

    async fn fetch_queue(&self, addr: &str) -> Result<Vec<QueueEntry>, PeerError> {
        match tokio::time::timeout(self.config.probe_timeout, self.peers.fetch_queue(addr)).await {
            Ok(result) => result,
            Err(_) => Err(PeerError::Timeout {
                url: peer_url(addr, QUEUE_PATH),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::testing::ScriptedPeers;
    use crate::storage::{MemoryStore, StoreError, StoreResult};

    /// A memory store whose queue rejects every insert.
    struct FullQueue(MemoryStore);

    impl NodeStore for FullQueue {
        fn insert_node(&self, table: NodeTable, record: &NodeRecord) -> StoreResult<bool> {
            match table {
                NodeTable::Queued => Err(StoreError::Serialization("disk full".into())),
                _ => self.0.insert_node(table, record),
            }
        }

        fn contains_node(&self, table: NodeTable, ip_address: &str) -> StoreResult<bool> {
            self.0.contains_node(table, ip_address)
        }

        fn list_nodes(&self, table: NodeTable) -> StoreResult<Vec<NodeRecord>> {
            self.0.list_nodes(table)
        }

        fn promote_buffer(&self) -> StoreResult<usize> {
            self.0.promote_buffer()
        }

        fn set_reachable(&self, computer_id: &str, reachable: bool) -> StoreResult<bool> {
            self.0.set_reachable(computer_id, reachable)
        }

        fn reassign_nodes(
            &self,
            assign: &dyn Fn(Vec<NodeRecord>) -> Vec<NodeRecord>,
        ) -> StoreResult<Vec<NodeRecord>> {
            self.0.reassign_nodes(assign)
        }
    }

    fn gossip(
        peers: ScriptedPeers,
        dedup_confirmed: bool,
    ) -> (Arc<MemoryStore>, GossipSync<MemoryStore, ScriptedPeers>) {
        let store = Arc::new(MemoryStore::new());
        let config = GossipConfig {
            probe_timeout: Duration::from_secs(7),
            max_concurrency: 4,
            dedup_confirmed,
        };
        let sync = GossipSync::new(Arc::clone(&store), Arc::new(peers), config);
        (store, sync)
    }

    fn confirm(store: &MemoryStore, ip: &str) {
        store
            .insert_node(NodeTable::Confirmed, &NodeRecord::new(ip))
            .unwrap();
    }

    fn queued_ips(store: &MemoryStore) -> Vec<String> {
        let mut ips: Vec<String> = store
            .list_nodes(NodeTable::Queued)
            .unwrap()
            .into_iter()
            .map(|n| n.ip_address)
            .collect();
        ips.sort();
        ips
    }

    // -- 1. Promotion ---------------------------------------------------------

    #[tokio::test]
    async fn cycle_promotes_buffer() {
        let (store, sync) = gossip(ScriptedPeers::new(), true);
        store
            .insert_node(NodeTable::Buffered, &NodeRecord::new("10.0.0.1:80"))
            .unwrap();

        let report = sync.sync_cycle().await;
        assert_eq!(report.promoted, 1);
        assert!(store.list_nodes(NodeTable::Buffered).unwrap().is_empty());
        assert_eq!(queued_ips(&store), vec!["10.0.0.1:80"]);
        assert!(report.is_clean());
    }

    // -- 2. Liveness ----------------------------------------------------------

    #[tokio::test]
    async fn sweep_marks_each_node_independently() {
        let peers = ScriptedPeers::new().alive("a:80").with_queue("a:80", vec![]);
        let (store, sync) = gossip(peers, true);
        confirm(&store, "a:80");
        confirm(&store, "b:80");

        let report = sync.sync_cycle().await;
        assert_eq!(report.probed, 2);
        assert_eq!(report.reachable, 1);
        assert_eq!(report.unreachable, 1);

        let nodes = store.list_nodes(NodeTable::Confirmed).unwrap();
        let a = nodes.iter().find(|n| n.ip_address == "a:80").unwrap();
        let b = nodes.iter().find(|n| n.ip_address == "b:80").unwrap();
        assert!(a.reachable);
        assert!(!b.reachable);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_peer_times_out_without_stalling_others() {
        let peers = ScriptedPeers::new()
            .hanging("slow:80")
            .alive("fast:80")
            .with_queue("fast:80", vec![QueueEntry::new("new:80")]);
        let (store, sync) = gossip(peers, true);
        confirm(&store, "slow:80");
        confirm(&store, "fast:80");

        let report = sync.sync_cycle().await;
        assert_eq!(report.unreachable, 1);
        assert_eq!(report.merged, 1);
        assert_eq!(queued_ips(&store), vec!["new:80"]);
    }

    #[tokio::test]
    async fn recovered_peer_is_marked_reachable_again() {
        let peers = ScriptedPeers::new().alive("a:80").with_queue("a:80", vec![]);
        let (store, sync) = gossip(peers, true);
        confirm(&store, "a:80");
        let id = NodeRecord::new("a:80").computer_id;
        store.set_reachable(&id, false).unwrap();

        sync.sync_cycle().await;
        assert!(store.list_nodes(NodeTable::Confirmed).unwrap()[0].reachable);
    }

    // -- 3. Reconciliation ----------------------------------------------------

    #[tokio::test]
    async fn merges_remote_queues_idempotently() {
        let peers = ScriptedPeers::new()
            .alive("a:80")
            .alive("b:80")
            .with_queue("a:80", vec![QueueEntry::new("x:80"), QueueEntry::new("y:80")])
            .with_queue("b:80", vec![QueueEntry::new("y:80"), QueueEntry::new("")]);
        let (store, sync) = gossip(peers, true);
        confirm(&store, "a:80");
        confirm(&store, "b:80");

        let first = sync.sync_cycle().await;
        assert_eq!(first.peers_reconciled, 2);
        assert_eq!(first.merged, 2);
        assert_eq!(queued_ips(&store), vec!["x:80", "y:80"]);

        let second = sync.sync_cycle().await;
        assert_eq!(second.merged, 0);
        assert_eq!(queued_ips(&store), vec!["x:80", "y:80"]);
    }

    #[tokio::test]
    async fn confirmed_entries_are_skipped_when_deduplicating() {
        let peers = ScriptedPeers::new()
            .alive("a:80")
            .alive("b:80")
            .with_queue("a:80", vec![QueueEntry::new("b:80")]);
        let (store, sync) = gossip(peers, true);
        confirm(&store, "a:80");
        confirm(&store, "b:80");

        let report = sync.sync_cycle().await;
        assert_eq!(report.skipped_confirmed, 1);
        assert!(queued_ips(&store).is_empty());
    }

    #[tokio::test]
    async fn confirmed_entries_are_queued_without_dedup() {
        let peers = ScriptedPeers::new()
            .alive("a:80")
            .with_queue("a:80", vec![QueueEntry::new("a:80")]);
        let (store, sync) = gossip(peers, false);
        confirm(&store, "a:80");

        let report = sync.sync_cycle().await;
        assert_eq!(report.merged, 1);
        assert_eq!(queued_ips(&store), vec!["a:80"]);
    }

    #[tokio::test]
    async fn failed_queue_fetch_marks_peer_unreachable() {
        // Answers pings but has no queue endpoint.
        let peers = ScriptedPeers::new().alive("a:80");
        let (store, sync) = gossip(peers, true);
        confirm(&store, "a:80");

        let report = sync.sync_cycle().await;
        assert_eq!(report.reachable, 1);
        assert_eq!(report.peers_reconciled, 0);
        assert!(!store.list_nodes(NodeTable::Confirmed).unwrap()[0].reachable);
    }

    #[tokio::test]
    async fn failed_queue_merges_are_reported() {
        let peers = ScriptedPeers::new().alive("a:80").with_queue(
            "a:80",
            vec![QueueEntry::new("x:80"), QueueEntry::new("y:80")],
        );
        let store = Arc::new(FullQueue(MemoryStore::new()));
        store
            .insert_node(NodeTable::Confirmed, &NodeRecord::new("a:80"))
            .unwrap();
        let sync = GossipSync::new(Arc::clone(&store), Arc::new(peers), GossipConfig::default());

        let report = sync.sync_cycle().await;
        assert_eq!(report.peers_reconciled, 1);
        assert_eq!(report.merged, 0);
        assert!(!report.is_clean());
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.starts_with("reconciliation: a:80: ") && e.contains("disk full")));
    }

    #[tokio::test]
    async fn unreachable_peers_are_not_queried() {
        let peers = ScriptedPeers::new().with_queue("a:80", vec![QueueEntry::new("x:80")]);
        let (store, sync) = gossip(peers, true);
        confirm(&store, "a:80");

        let report = sync.sync_cycle().await;
        assert_eq!(report.peers_reconciled, 0);
        assert!(queued_ips(&store).is_empty());
    }
}
