//! In-memory [`Store`](super::Store) adapter.
//!
//! All state sits behind one mutex, so every trait method is trivially
//! atomic. Backs the unit tests across the crate.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use super::{
    plan_transfer, sort_nodes, NodeRecord, NodeStore, NodeTable, NonceRecord, NonceStore,
    StoreResult, TransferOutcome, Wallet, WalletStore,
};
use crate::crypto::hash::computer_id;

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<String, u64>,
    nonces: HashMap<String, NonceRecord>,
    nodes: BTreeMap<String, NodeRecord>,
    nodes_que: BTreeMap<String, NodeRecord>,
    nodes_buffer: BTreeMap<String, NodeRecord>,
}

impl State {
    fn table(&mut self, table: NodeTable) -> &mut BTreeMap<String, NodeRecord> {
        match table {
            NodeTable::Confirmed => &mut self.nodes,
            NodeTable::Queued => &mut self.nodes_que,
            NodeTable::Buffered => &mut self.nodes_buffer,
        }
    }
}

/// Store backed by plain collections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletStore for MemoryStore {
    fn ensure_wallet(&self, address: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        if state.wallets.contains_key(address) {
            return Ok(false);
        }
        state.wallets.insert(address.to_string(), 0);
        Ok(true)
    }

    fn wallet(&self, address: &str) -> StoreResult<Option<Wallet>> {
        Ok(self.state.lock().wallets.get(address).map(|&balance| Wallet {
            address: address.to_string(),
            balance,
        }))
    }

    fn wallets(&self) -> StoreResult<Vec<Wallet>> {
        Ok(self
            .state
            .lock()
            .wallets
            .iter()
            .map(|(address, &balance)| Wallet {
                address: address.clone(),
                balance,
            })
            .collect())
    }

    fn set_balance(&self, address: &str, balance: u64) -> StoreResult<()> {
        self.state.lock().wallets.insert(address.to_string(), balance);
        Ok(())
    }

    fn apply_transfer(&self, from: &str, to: &str, amount: u64) -> StoreResult<TransferOutcome> {
        let mut state = self.state.lock();
        let from_balance = state.wallets.get(from).copied();
        let to_balance = state.wallets.get(to).copied();

        let outcome = plan_transfer(from_balance, to_balance, from == to, amount);
        if let TransferOutcome::Applied {
            from_balance,
            to_balance,
        } = outcome
        {
            state.wallets.insert(from.to_string(), from_balance);
            state.wallets.insert(to.to_string(), to_balance);
        }
        Ok(outcome)
    }
}

impl NonceStore for MemoryStore {
    fn claim_nonce(&self, nonce: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        if state.nonces.contains_key(nonce) {
            return Ok(false);
        }
        let record = NonceRecord {
            nonce: nonce.to_string(),
            claimed_at: chrono::Utc::now().timestamp(),
        };
        state.nonces.insert(nonce.to_string(), record);
        Ok(true)
    }

    fn nonce_exists(&self, nonce: &str) -> StoreResult<bool> {
        Ok(self.state.lock().nonces.contains_key(nonce))
    }
}

impl NodeStore for MemoryStore {
    fn insert_node(&self, table: NodeTable, record: &NodeRecord) -> StoreResult<bool> {
        let mut state = self.state.lock();
        let rows = state.table(table);
        if rows.contains_key(&record.computer_id) {
            return Ok(false);
        }
        rows.insert(record.computer_id.clone(), record.clone());
        Ok(true)
    }

    fn contains_node(&self, table: NodeTable, ip_address: &str) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .table(table)
            .contains_key(&computer_id(ip_address)))
    }

    fn list_nodes(&self, table: NodeTable) -> StoreResult<Vec<NodeRecord>> {
        let mut nodes: Vec<NodeRecord> = self.state.lock().table(table).values().cloned().collect();
        sort_nodes(&mut nodes);
        Ok(nodes)
    }

    fn promote_buffer(&self) -> StoreResult<usize> {
        let mut state = self.state.lock();
        let buffered = std::mem::take(&mut state.nodes_buffer);
        let moved = buffered.len();
        state.nodes_que.extend(buffered);
        Ok(moved)
    }

    fn set_reachable(&self, computer_id: &str, reachable: bool) -> StoreResult<bool> {
        match self.state.lock().nodes.get_mut(computer_id) {
            Some(record) => {
                record.reachable = reachable;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn reassign_nodes(
        &self,
        assign: &dyn Fn(Vec<NodeRecord>) -> Vec<NodeRecord>,
    ) -> StoreResult<Vec<NodeRecord>> {
        let mut state = self.state.lock();
        let current: Vec<NodeRecord> = state.nodes.values().cloned().collect();
        let mut assigned = assign(current);
        for record in &assigned {
            state
                .nodes
                .insert(record.computer_id.clone(), record.clone());
        }
        sort_nodes(&mut assigned);
        Ok(assigned)
    }
}
