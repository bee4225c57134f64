//! # Ledger
//!
//! The two pieces of state a settlement touches after its signature checks
//! out:
//!
//! - [`NonceLedger`] remembers which nonces have been spent.
//! - [`WalletLedger`] moves balances between wallets.
//!
//! Both are thin policy layers over a store adapter. The store makes each
//! call atomic; these types decide what counts as a valid call and what the
//! caller gets back.

pub mod nonce;
pub mod wallet;

pub use nonce::NonceLedger;
pub use wallet::{LedgerError, TransferReceipt, WalletLedger};
