//! # SledStore: Persistent Storage Engine
//!
//! The persistent [`Store`](super::Store) adapter, built on sled's embedded
//! key-value store.
//!
//! ## Tree Layout
//!
//! | Tree           | Key                     | Value                 |
//! |----------------|-------------------------|-----------------------|
//! | `wallets`      | `address` (UTF-8)       | `bincode(Wallet)`     |
//! | `nonces`       | `nonce` (UTF-8)         | `bincode(NonceRecord)`|
//! | `nodes`        | `computer_id` (UTF-8)   | `bincode(NodeRecord)` |
//! | `nodes_que`    | `computer_id` (UTF-8)   | `bincode(NodeRecord)` |
//! | `nodes_buffer` | `computer_id` (UTF-8)   | `bincode(NodeRecord)` |
//!
//! ## Atomicity
//!
//! - Unique inserts (wallet provisioning, nonce claims, node inserts) are a
//!   single `compare_and_swap` against an absent key. Exactly one racing
//!   writer sees success.
//! - Transfers run in a sled transaction over `wallets`. sled retries the
//!   closure on conflict, so two transfers debiting the same wallet never
//!   both pass the balance check against the same snapshot.
//! - Promotion is a two-tree transaction (`nodes_buffer`, `nodes_que`).
//! - `TransactionalTree` can't iterate, so multi-row operations snapshot the
//!   key set first and then re-read each key inside the transaction. The
//!   writer lock keeps two promotions or two re-shards from working off the
//!   same snapshot.

use std::path::Path;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use sled::{Db, IVec, Transactional, Tree};

use super::{
    plan_transfer, sort_nodes, NodeRecord, NodeStore, NodeTable, NonceRecord, NonceStore,
    StoreError, StoreResult, TransferOutcome, Wallet, WalletStore,
};
use crate::crypto::hash::computer_id;

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Lift a store result into a transaction closure, aborting on error.
fn abort_on<T>(result: StoreResult<T>) -> ConflictableTransactionResult<T, StoreError> {
    result.map_err(ConflictableTransactionError::Abort)
}

fn unwrap_tx<T>(result: Result<T, TransactionError<StoreError>>) -> StoreResult<T> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    })
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Persistent store over a sled database.
///
/// Share it as `Arc<SledStore>`; sled trees are internally synchronized.
#[derive(Debug)]
pub struct SledStore {
    db: Db,
    wallets: Tree,
    nonces: Tree,
    nodes: Tree,
    nodes_que: Tree,
    nodes_buffer: Tree,
    /// Serializes promotions and re-shards.
    writer: Mutex<()>,
}

impl SledStore {
    /// Open or create a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that lives in memory and is discarded on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            wallets: db.open_tree("wallets")?,
            nonces: db.open_tree("nonces")?,
            nodes: db.open_tree(NodeTable::Confirmed.name())?,
            nodes_que: db.open_tree(NodeTable::Queued.name())?,
            nodes_buffer: db.open_tree(NodeTable::Buffered.name())?,
            db,
            writer: Mutex::new(()),
        })
    }

    fn tree(&self, table: NodeTable) -> &Tree {
        match table {
            NodeTable::Confirmed => &self.nodes,
            NodeTable::Queued => &self.nodes_que,
            NodeTable::Buffered => &self.nodes_buffer,
        }
    }

    /// Insert `value` under `key` only if the key is absent.
    fn insert_if_absent(tree: &Tree, key: &[u8], value: Vec<u8>) -> StoreResult<bool> {
        let swapped = tree.compare_and_swap(key, None as Option<&[u8]>, Some(value))?;
        Ok(swapped.is_ok())
    }

    fn keys(tree: &Tree) -> StoreResult<Vec<IVec>> {
        tree.iter()
            .keys()
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    /// Block until all pending writes are durable.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// -- Wallets ----------------------------------------------------------------

impl WalletStore for SledStore {
    fn ensure_wallet(&self, address: &str) -> StoreResult<bool> {
        let wallet = Wallet {
            address: address.to_string(),
            balance: 0,
        };
        Self::insert_if_absent(&self.wallets, address.as_bytes(), encode(&wallet)?)
    }

    fn wallet(&self, address: &str) -> StoreResult<Option<Wallet>> {
        self.wallets
            .get(address.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn wallets(&self) -> StoreResult<Vec<Wallet>> {
        self.wallets
            .iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    fn set_balance(&self, address: &str, balance: u64) -> StoreResult<()> {
        let wallet = Wallet {
            address: address.to_string(),
            balance,
        };
        self.wallets.insert(address.as_bytes(), encode(&wallet)?)?;
        Ok(())
    }

    fn apply_transfer(&self, from: &str, to: &str, amount: u64) -> StoreResult<TransferOutcome> {
        let result = self.wallets.transaction(
            |tx| -> ConflictableTransactionResult<TransferOutcome, StoreError> {
                let read = |key: &str| -> ConflictableTransactionResult<Option<u64>, StoreError> {
                    match tx.get(key.as_bytes())? {
                        Some(bytes) => Ok(Some(abort_on(decode::<Wallet>(&bytes))?.balance)),
                        None => Ok(None),
                    }
                };
                let from_balance = read(from)?;
                let to_balance = if from == to { from_balance } else { read(to)? };

                let outcome = plan_transfer(from_balance, to_balance, from == to, amount);
                if let TransferOutcome::Applied {
                    from_balance,
                    to_balance,
                } = outcome
                {
                    let debited = Wallet {
                        address: from.to_string(),
                        balance: from_balance,
                    };
                    tx.insert(from.as_bytes(), abort_on(encode(&debited))?)?;
                    if from != to {
                        let credited = Wallet {
                            address: to.to_string(),
                            balance: to_balance,
                        };
                        tx.insert(to.as_bytes(), abort_on(encode(&credited))?)?;
                    }
                }
                Ok(outcome)
            },
        );
        unwrap_tx(result)
    }
}

// -- Nonces -----------------------------------------------------------------

impl NonceStore for SledStore {
    fn claim_nonce(&self, nonce: &str) -> StoreResult<bool> {
        let record = NonceRecord {
            nonce: nonce.to_string(),
            claimed_at: chrono::Utc::now().timestamp(),
        };
        Self::insert_if_absent(&self.nonces, nonce.as_bytes(), encode(&record)?)
    }

    fn nonce_exists(&self, nonce: &str) -> StoreResult<bool> {
        Ok(self.nonces.contains_key(nonce.as_bytes())?)
    }
}

// -- Nodes ------------------------------------------------------------------

impl NodeStore for SledStore {
    fn insert_node(&self, table: NodeTable, record: &NodeRecord) -> StoreResult<bool> {
        Self::insert_if_absent(
            self.tree(table),
            record.computer_id.as_bytes(),
            encode(record)?,
        )
    }

    fn contains_node(&self, table: NodeTable, ip_address: &str) -> StoreResult<bool> {
        Ok(self.tree(table).contains_key(computer_id(ip_address).as_bytes())?)
    }

    fn list_nodes(&self, table: NodeTable) -> StoreResult<Vec<NodeRecord>> {
        let mut nodes = self
            .tree(table)
            .iter()
            .values()
            .map(|value| decode(&value?))
            .collect::<StoreResult<Vec<NodeRecord>>>()?;
        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    fn promote_buffer(&self) -> StoreResult<usize> {
        let _guard = self.writer.lock();
        let keys = Self::keys(&self.nodes_buffer)?;
        if keys.is_empty() {
            return Ok(0);
        }

        // Rows buffered after the snapshot stay put until the next cycle.
        let result = (&self.nodes_buffer, &self.nodes_que).transaction(
            |(buffer, queue)| -> ConflictableTransactionResult<usize, StoreError> {
                let mut moved = 0;
                for key in &keys {
                    if let Some(value) = buffer.remove(key.clone())? {
                        queue.insert(key.clone(), value)?;
                        moved += 1;
                    }
                }
                Ok(moved)
            },
        );
        unwrap_tx(result)
    }

    fn set_reachable(&self, computer_id: &str, reachable: bool) -> StoreResult<bool> {
        let result = self.nodes.transaction(
            |tx| -> ConflictableTransactionResult<bool, StoreError> {
                let Some(bytes) = tx.get(computer_id.as_bytes())? else {
                    return Ok(false);
                };
                let mut record: NodeRecord = abort_on(decode(&bytes))?;
                if record.reachable != reachable {
                    record.reachable = reachable;
                    tx.insert(computer_id.as_bytes(), abort_on(encode(&record))?)?;
                }
                Ok(true)
            },
        );
        unwrap_tx(result)
    }

    fn reassign_nodes(
        &self,
        assign: &dyn Fn(Vec<NodeRecord>) -> Vec<NodeRecord>,
    ) -> StoreResult<Vec<NodeRecord>> {
        let _guard = self.writer.lock();
        let keys = Self::keys(&self.nodes)?;

        let result = self.nodes.transaction(
            |tx| -> ConflictableTransactionResult<Vec<NodeRecord>, StoreError> {
                let mut current = Vec::with_capacity(keys.len());
                for key in &keys {
                    if let Some(bytes) = tx.get(key)? {
                        current.push(abort_on(decode::<NodeRecord>(&bytes))?);
                    }
                }

                let assigned = assign(current);
                for record in &assigned {
                    tx.insert(record.computer_id.as_bytes(), abort_on(encode(record))?)?;
                }
                Ok(assigned)
            },
        );
        let mut written = unwrap_tx(result)?;
        sort_nodes(&mut written);
        Ok(written)
    }
}
