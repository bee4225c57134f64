//! One-shot nonce consumption.

use std::sync::Arc;

use tracing::debug;

use crate::storage::{NonceStore, StoreResult};

/// Replay protection over a [`NonceStore`].
pub struct NonceLedger<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for NonceLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: NonceStore + ?Sized> NonceLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Consume `nonce`.
    ///
    /// Returns `Ok(false)` if this call recorded it and `Ok(true)` if it was
    /// already used. The record is never modified once written, so of many
    /// concurrent calls with the same nonce exactly one sees `false`.
    pub fn check_and_consume(&self, nonce: &str) -> StoreResult<bool> {
        let already_used = !self.store.claim_nonce(nonce)?;
        if already_used {
            debug!(nonce = %nonce, "nonce already consumed");
        }
        Ok(already_used)
    }

    /// Whether `nonce` has been consumed, without consuming it.
    pub fn is_used(&self, nonce: &str) -> StoreResult<bool> {
        self.store.nonce_exists(nonce)
    }
}
