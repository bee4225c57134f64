//! # Shard Assignment
//!
//! Re-shards the confirmed node set: a seeded shuffle, a dense `1..=N`
//! sort order over the shuffled sequence, then contiguous groups of
//! `group_size` nodes. Group numbers start at 1 and the last group may be
//! short.
//!
//! The shuffle is keyed only by the seed and the set of computer ids. The
//! input is sorted by computer id before shuffling so that the permutation
//! does not depend on the order the store happened to return rows in.
//! Every node using the same seed computes the same sharding.
//!
//! Read, shuffle, renumber and write happen inside one
//! [`NodeStore::reassign_nodes`] call, so two concurrent re-shards cannot
//! interleave their writes.

use std::num::NonZeroU32;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::storage::{NodeRecord, NodeStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("group size must be at least 1")]
    InvalidGroupSize,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Deterministically permute `nodes` under `seed`.
pub fn shuffle_nodes(mut nodes: Vec<NodeRecord>, seed: u64) -> Vec<NodeRecord> {
    nodes.sort_by(|a, b| a.computer_id.cmp(&b.computer_id));
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    nodes.shuffle(&mut rng);
    nodes
}

/// Number nodes `1..=N` in their current order.
pub fn assign_order(nodes: &mut [NodeRecord]) {
    for (i, node) in nodes.iter_mut().enumerate() {
        node.sort_order = (i + 1) as u32;
    }
}

/// Partition nodes, in their current order, into groups of `group_size`.
pub fn assign_groups(nodes: &mut [NodeRecord], group_size: u32) -> Result<(), ShardError> {
    write_groups(nodes, non_zero(group_size)?);
    Ok(())
}

fn non_zero(group_size: u32) -> Result<NonZeroU32, ShardError> {
    NonZeroU32::new(group_size).ok_or(ShardError::InvalidGroupSize)
}

fn write_groups(nodes: &mut [NodeRecord], group_size: NonZeroU32) {
    for (i, node) in nodes.iter_mut().enumerate() {
        node.node_group = i as u32 / group_size.get() + 1;
    }
}

/// Applies shuffle, order and grouping to the confirmed set in one step.
pub struct ShardAssigner<S: ?Sized> {
    store: Arc<S>,
}

impl<S: NodeStore + ?Sized> ShardAssigner<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Re-shard all confirmed nodes. Returns them in their new order.
    pub fn reshard(&self, seed: u64, group_size: u32) -> Result<Vec<NodeRecord>, ShardError> {
        let size = non_zero(group_size)?;
        let assigned = self.store.reassign_nodes(&|nodes| {
            let mut nodes = shuffle_nodes(nodes, seed);
            assign_order(&mut nodes);
            write_groups(&mut nodes, size);
            nodes
        })?;

        info!(
            nodes = assigned.len(),
            seed,
            group_size,
            groups = assigned.last().map(|n| n.node_group).unwrap_or(0),
            "confirmed nodes re-sharded"
        );
        Ok(assigned)
    }
}
