//! # Storage Module
//!
//! The store is the only shared mutable state in the node. Every component
//! above it (ledgers, registry, gossip, shard assignment) holds an
//! `Arc<S>` where `S` implements one of the traits below, and does all of its
//! mutation through them.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs       typed records, store traits, transfer planning
//! db.rs        SledStore: persistent adapter over sled trees
//! memory.rs    MemoryStore: in-process adapter for tests and dev nodes
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Typed records, not column maps.** `Wallet`, `NonceRecord` and
//!    `NodeRecord` are plain structs. Encoding happens only inside an
//!    adapter (bincode for sled), so nothing above this module ever
//!    inspects raw bytes.
//!
//! 2. **Atomic operations are store operations.** Anything that must be
//!    all-or-nothing (a transfer, a nonce claim, buffer promotion, a
//!    re-shard) is a single trait method. Adapters decide how to make it
//!    atomic; callers never compose read-then-write sequences themselves.
//!
//! 3. **Node tables are keyed by `computer_id`.** The key is derived from the
//!    address, so inserting the same node twice is a no-op rather than a
//!    duplicate row.

pub mod db;
pub mod memory;

use serde::{Deserialize, Serialize};

use crate::crypto::hash::computer_id;

pub use db::SledStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors raised by a store adapter.
///
/// Always fatal to the current operation and always surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A balance account, keyed by its address (the sender's base64 public key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub address: String,
    pub balance: u64,
}

/// Presence of this record means the nonce has been spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceRecord {
    pub nonce: String,
    /// Unix seconds at which the nonce was claimed.
    pub claimed_at: i64,
}

/// A row in one of the three node tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// 1-based position after the last re-shard; 0 until assigned.
    pub sort_order: u32,
    /// `hex(sha256(ip_address))`. The row key.
    pub computer_id: String,
    /// `host:port` the node is reached at.
    pub ip_address: String,
    /// Group label after the last re-shard; 0 until assigned.
    pub node_group: u32,
    pub reachable: bool,
}

impl NodeRecord {
    /// A fresh, unassigned record for `ip_address`.
    pub fn new(ip_address: impl Into<String>) -> Self {
        let ip_address = ip_address.into();
        Self {
            sort_order: 0,
            computer_id: computer_id(&ip_address),
            ip_address,
            node_group: 0,
            reachable: true,
        }
    }
}

/// The three stages a node moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeTable {
    /// `nodes`: authoritative membership.
    Confirmed,
    /// `nodes_que`: candidates awaiting confirmation.
    Queued,
    /// `nodes_buffer`: freshly announced, not yet promoted.
    Buffered,
}

impl NodeTable {
    pub const ALL: [NodeTable; 3] = [NodeTable::Confirmed, NodeTable::Queued, NodeTable::Buffered];

    /// Table name as it appears on disk and in logs.
    pub fn name(self) -> &'static str {
        match self {
            NodeTable::Confirmed => "nodes",
            NodeTable::Queued => "nodes_que",
            NodeTable::Buffered => "nodes_buffer",
        }
    }
}

impl std::fmt::Display for NodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// What an atomic transfer did, or why it did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Both rows written. Carries the balances after the move.
    Applied { from_balance: u64, to_balance: u64 },
    /// The sender has no wallet row.
    UnknownSender,
    /// The sender's balance is below the amount. Nothing was written.
    InsufficientFunds { balance: u64 },
    /// Crediting the recipient would overflow.
    Overflow,
}

/// Decide the result of moving `amount` given the balances read inside the
/// adapter's transaction. A missing recipient starts at zero.
///
/// Shared by every adapter so they agree on edge cases.
pub fn plan_transfer(
    from_balance: Option<u64>,
    to_balance: Option<u64>,
    self_transfer: bool,
    amount: u64,
) -> TransferOutcome {
    let Some(from_balance) = from_balance else {
        return TransferOutcome::UnknownSender;
    };
    if from_balance < amount {
        return TransferOutcome::InsufficientFunds {
            balance: from_balance,
        };
    }
    if self_transfer {
        return TransferOutcome::Applied {
            from_balance,
            to_balance: from_balance,
        };
    }
    match to_balance.unwrap_or(0).checked_add(amount) {
        Some(to_balance) => TransferOutcome::Applied {
            from_balance: from_balance - amount,
            to_balance,
        },
        None => TransferOutcome::Overflow,
    }
}

// ---------------------------------------------------------------------------
// Store Traits
// ---------------------------------------------------------------------------

/// Wallet balances.
pub trait WalletStore: Send + Sync {
    /// Insert a zero-balance wallet if none exists. Returns `true` if this
    /// call created it. Concurrent callers create at most one row.
    fn ensure_wallet(&self, address: &str) -> StoreResult<bool>;

    fn wallet(&self, address: &str) -> StoreResult<Option<Wallet>>;

    fn wallets(&self) -> StoreResult<Vec<Wallet>>;

    /// Overwrite a balance, creating the wallet if needed. Administrative
    /// only (genesis funding); never used by settlement.
    fn set_balance(&self, address: &str, balance: u64) -> StoreResult<()>;

    /// Check and move `amount` from `from` to `to` as one isolated unit.
    fn apply_transfer(&self, from: &str, to: &str, amount: u64) -> StoreResult<TransferOutcome>;
}

/// Spent nonces.
pub trait NonceStore: Send + Sync {
    /// Record `nonce` if absent. Returns `true` if this call recorded it,
    /// `false` if it was already present. Exactly one concurrent caller wins.
    fn claim_nonce(&self, nonce: &str) -> StoreResult<bool>;

    fn nonce_exists(&self, nonce: &str) -> StoreResult<bool>;
}

/// The three node tables.
pub trait NodeStore: Send + Sync {
    /// Insert `record` into `table` unless a row with its `computer_id`
    /// already exists. Returns `true` if inserted.
    fn insert_node(&self, table: NodeTable, record: &NodeRecord) -> StoreResult<bool>;

    fn contains_node(&self, table: NodeTable, ip_address: &str) -> StoreResult<bool>;

    /// All rows of `table`, ordered by `(sort_order, computer_id)`.
    fn list_nodes(&self, table: NodeTable) -> StoreResult<Vec<NodeRecord>>;

    /// Move every buffered row into the queue and remove it from the buffer,
    /// atomically. Returns the number of rows moved.
    fn promote_buffer(&self) -> StoreResult<usize>;

    /// Update the `reachable` flag of one confirmed node. Returns `false` if
    /// no such node exists.
    fn set_reachable(&self, computer_id: &str, reachable: bool) -> StoreResult<bool>;

    /// Read every confirmed row, pass them to `assign`, and write back what
    /// it returns, as a single unit no other re-shard can interleave with.
    /// Returns the rows as written.
    fn reassign_nodes(
        &self,
        assign: &dyn Fn(Vec<NodeRecord>) -> Vec<NodeRecord>,
    ) -> StoreResult<Vec<NodeRecord>>;
}

/// Everything the node needs from its backing store.
pub trait Store: WalletStore + NonceStore + NodeStore {}

impl<T: WalletStore + NonceStore + NodeStore + ?Sized> Store for T {}

pub(crate) fn sort_nodes(nodes: &mut [NodeRecord]) {
    nodes.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.computer_id.cmp(&b.computer_id))
    });
}

// ---------------------------------------------------------------------------
// Adapter conformance
// ---------------------------------------------------------------------------
