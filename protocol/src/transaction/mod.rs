//! # Transaction Module
//!
//! Signed transfer requests and the pipeline that settles them.
//!
//! ## Architecture
//!
//! ```text
//! types.rs        Transaction and SignedTransaction wire types
//! canonical.rs    deterministic key-sorted JSON, the signed message format
//! settlement.rs   verify → nonce → transfer pipeline with typed rejections
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Sign**: the client canonicalizes `{from, to, amount, nonce}` and
//!    signs those bytes with the key whose base64 public key is `from`.
//! 2. **Submit**: `{signature, transaction}` is POSTed to the node.
//! 3. **Settle**: [`Settlement::settle`] rebuilds the canonical message,
//!    verifies the signature, consumes the nonce and moves the balance.
//!
//! ## Design Decisions
//!
//! - Amounts are `u64` base units carried as decimal strings. No floating
//!   point anywhere near a balance.
//! - The canonical message is rebuilt from the typed struct, so unknown
//!   fields a client adds to `transaction` are never part of what is
//!   verified.

pub mod canonical;
pub mod settlement;
pub mod types;

pub use canonical::{canonical_message, canonicalize, CodecError};
pub use settlement::{Rejection, Settlement, SettlementError, SettlementOutcome};
pub use types::{AmountError, SignedTransaction, Transaction};
