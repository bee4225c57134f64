//! Wire types for signed transfers.
//!
//! A transaction is never stored as such; only its effects (a spent nonce
//! and two balance changes) are. These types exist to carry a request from
//! the HTTP layer through the settlement pipeline.

use serde::{Deserialize, Serialize};

use super::canonical::{canonical_message, CodecError};
use crate::crypto::keys::EcKeypair;

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// The signed fields of a transfer.
///
/// `amount` stays a decimal string on the wire because the client signs the
/// string form; it is parsed with [`Transaction::amount_units`] only after
/// the canonical message has been rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender address: the base64 public key that signed this transaction.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Positive integer amount in base units, as a decimal string.
    pub amount: String,
    /// Client-chosen one-time token.
    pub nonce: String,
}

/// Why an `amount` string isn't a usable transfer amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount {0:?} is not a non-negative decimal integer")]
    NotAnInteger(String),

    #[error("amount must be greater than zero")]
    Zero,
}

impl Transaction {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        amount: u64,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            amount: amount.to_string(),
            nonce: nonce.into(),
        }
    }

    /// Parse `amount` as base units. Only ASCII digits are accepted: no sign,
    /// no whitespace, no decimal point.
    pub fn amount_units(&self) -> Result<u64, AmountError> {
        let raw = self.amount.as_str();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::NotAnInteger(raw.to_string()));
        }
        match raw.parse::<u64>() {
            Ok(0) => Err(AmountError::Zero),
            Ok(units) => Ok(units),
            // All digits but too large for u64.
            Err(_) => Err(AmountError::NotAnInteger(raw.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SignedTransaction
// ---------------------------------------------------------------------------

/// The settlement request body: a transaction plus the sender's signature
/// over its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Base64 DER signature.
    pub signature: String,
    pub transaction: Transaction,
}

impl SignedTransaction {
    /// Sign `transaction` with `keypair`. The caller is responsible for
    /// `transaction.from` matching the keypair's public key.
    pub fn sign(transaction: Transaction, keypair: &EcKeypair) -> Result<Self, CodecError> {
        let message = canonical_message(&transaction)?;
        Ok(Self {
            signature: keypair.sign_base64(message.as_bytes()),
            transaction,
        })
    }
}
