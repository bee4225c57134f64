//! # Network Module
//!
//! Node membership and how it spreads between nodes.
//!
//! ## Architecture
//!
//! ```text
//! peer.rs      Outbound calls to other nodes (/ping, /queData)
//! registry.rs  Admission of new candidates into the buffer
//! gossip.rs    Periodic promotion, liveness sweep and queue reconciliation
//! shard.rs     Seeded shuffle and group assignment of confirmed nodes
//! ```
//!
//! A candidate moves `nodes_buffer` -> `nodes_que` through gossip promotion.
//! Moving from `nodes_que` into `nodes` is an operator decision and happens
//! outside this crate (see [`NodeRegistry::seed_confirmed`]).
//!
//! All outbound traffic goes through the [`PeerClient`] trait. Nothing in
//! this module opens a socket directly, so every flow here can be tested
//! against scripted peers.

pub mod gossip;
pub mod peer;
pub mod registry;
pub mod shard;

pub use gossip::{GossipConfig, GossipSync, SyncReport};
pub use peer::{peer_url, HttpPeerClient, PeerClient, PeerError, PingResponse, QueueEntry};
pub use registry::{digest_nodes, AdmissionMethod, AdmissionReport, NodeRegistry, RegistryError};
pub use shard::{assign_groups, assign_order, shuffle_nodes, ShardAssigner, ShardError};

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted peers for driving registry and gossip flows in tests.

    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::peer::{peer_url, PeerClient, PeerError, PingResponse, QueueEntry};
    use crate::config::{PING_PATH, QUEUE_PATH};

    /// A [`PeerClient`] whose answers are fixed up front.
    ///
    /// Addresses not registered as alive fail with a transport error.
    /// Hanging addresses never answer; callers must bring their own timeout.
    #[derive(Default)]
    pub struct ScriptedPeers {
        alive: HashSet<String>,
        queues: HashMap<String, Vec<QueueEntry>>,
        hanging: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedPeers {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn alive(mut self, addr: &str) -> Self {
            self.alive.insert(addr.to_string());
            self
        }

        pub fn with_queue(mut self, addr: &str, entries: Vec<QueueEntry>) -> Self {
            self.queues.insert(addr.to_string(), entries);
            self
        }

        pub fn hanging(mut self, addr: &str) -> Self {
            self.hanging.insert(addr.to_string());
            self
        }

        /// Every URL requested so far, in call order.
        #[allow(dead_code)]
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        async fn stall(&self) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    #[async_trait]
    impl PeerClient for ScriptedPeers {
        async fn ping(&self, addr: &str) -> Result<PingResponse, PeerError> {
            let url = peer_url(addr, PING_PATH);
            self.calls.lock().push(url.clone());
            if self.hanging.contains(addr) {
                self.stall().await;
            }
            if self.alive.contains(addr) {
                Ok(PingResponse {
                    local_ip: addr.to_string(),
                    global_ip: addr.to_string(),
                })
            } else {
                Err(PeerError::Transport {
                    url,
                    reason: "connection refused".into(),
                })
            }
        }

        async fn fetch_queue(&self, addr: &str) -> Result<Vec<QueueEntry>, PeerError> {
            let url = peer_url(addr, QUEUE_PATH);
            self.calls.lock().push(url.clone());
            if self.hanging.contains(addr) {
                self.stall().await;
            }
            match self.queues.get(addr) {
                Some(entries) => Ok(entries.clone()),
                None => Err(PeerError::Transport {
                    url,
                    reason: "connection refused".into(),
                }),
            }
        }
    }
}
