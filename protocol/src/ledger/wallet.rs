//! # Wallet Ledger
//!
//! Balance accounts and the atomic transfer between them.
//!
//! ## Rules
//!
//! - A wallet is a non-negative integer balance keyed by address.
//! - Recipients are provisioned on first reference with balance 0.
//!   Senders are never provisioned: a transfer from an unknown address fails.
//! - A transfer either moves the full amount or changes nothing. The store
//!   runs the balance check and both writes as one isolated unit, so total
//!   supply is invariant across any interleaving of transfers.
//! - Zero-amount transfers are rejected before touching the store.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::storage::{StoreError, TransferOutcome, WalletStore};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors from wallet operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("transfer amount must be positive")]
    InvalidAmount,

    #[error("wallet not found: {0}")]
    UnknownWallet(String),

    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: u64, requested: u64 },

    #[error("crediting {0} would overflow its balance")]
    Overflow(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The result of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub from: String,
    pub to: String,
    pub amount: u64,
    /// Sender balance after the transfer.
    pub from_balance: u64,
    /// Recipient balance after the transfer.
    pub to_balance: u64,
}

// ---------------------------------------------------------------------------
// WalletLedger
// ---------------------------------------------------------------------------

/// Balance bookkeeping over a [`WalletStore`].
pub struct WalletLedger<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for WalletLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: WalletStore + ?Sized> WalletLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create `address` with balance 0 if it doesn't exist yet. Returns
    /// `true` if this call created it.
    pub fn ensure_wallet(&self, address: &str) -> Result<bool, LedgerError> {
        let created = self.store.ensure_wallet(address)?;
        if created {
            debug!(address = %address, "wallet provisioned");
        }
        Ok(created)
    }

    /// Current balance, or `None` if the wallet doesn't exist.
    pub fn balance(&self, address: &str) -> Result<Option<u64>, LedgerError> {
        Ok(self.store.wallet(address)?.map(|w| w.balance))
    }

    /// Set a wallet's balance outright. Genesis and administrative use only.
    pub fn fund(&self, address: &str, balance: u64) -> Result<(), LedgerError> {
        self.store.set_balance(address, balance)?;
        info!(address = %address, balance, "wallet funded");
        Ok(())
    }

    pub fn wallet_count(&self) -> Result<usize, LedgerError> {
        Ok(self.store.wallets()?.len())
    }

    /// Sum of every wallet balance.
    pub fn total_supply(&self) -> Result<u128, LedgerError> {
        Ok(self
            .store
            .wallets()?
            .iter()
            .map(|w| u128::from(w.balance))
            .sum())
    }

    /// Move `amount` from `from` to `to`.
    pub fn transfer(&self, from: &str, to: &str, amount: u64) -> Result<TransferReceipt, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        match self.store.apply_transfer(from, to, amount)? {
            TransferOutcome::Applied {
                from_balance,
                to_balance,
            } => {
                info!(from = %from, to = %to, amount, "transfer committed");
                Ok(TransferReceipt {
                    from: from.to_string(),
                    to: to.to_string(),
                    amount,
                    from_balance,
                    to_balance,
                })
            }
            TransferOutcome::UnknownSender => Err(LedgerError::UnknownWallet(from.to_string())),
            TransferOutcome::InsufficientFunds { balance } => Err(LedgerError::InsufficientFunds {
                balance,
                requested: amount,
            }),
            TransferOutcome::Overflow => Err(LedgerError::Overflow(to.to_string())),
        }
    }
}
