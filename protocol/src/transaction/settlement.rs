//! # Settlement Pipeline
//!
//! Turns a signed transfer request into either a committed balance move or
//! a rejection. Stages run in order and the first failure short-circuits:
//!
//! ```text
//! parse → canonicalize → amount → verify signature → claim nonce
//!       → provision recipient → transfer
//! ```
//!
//! ## Outcomes vs. errors
//!
//! Every business or cryptographic failure is folded into
//! [`SettlementOutcome::Invalid`] with a [`Rejection`] reason. Only a store
//! failure escapes as [`SettlementError`], because in that case the node
//! cannot say what state the ledger is in.
//!
//! ## Nonce gating
//!
//! The nonce is claimed only after the signature verifies. A request with a
//! forged signature therefore cannot burn someone else's nonce. A correctly
//! signed request that then fails the balance check has still spent its
//! nonce; the sender must re-sign with a fresh one.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::canonical::canonical_message;
use super::types::SignedTransaction;
use crate::crypto::signatures::{verify, SignatureScheme, Verification};
use crate::ledger::{LedgerError, NonceLedger, TransferReceipt, WalletLedger};
use crate::storage::{NonceStore, StoreError, WalletStore};

/// Why a settlement request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Request body or transaction could not be decoded.
    Encoding,
    /// Amount is not a positive integer.
    InvalidAmount,
    /// Signature is well-formed but does not match.
    CryptoInvalid,
    /// Signature or public key could not be decoded.
    VerificationError,
    /// Nonce already consumed.
    ReplayDetected,
    /// Sender has no wallet.
    UnknownSender,
    InsufficientFunds,
    /// Recipient balance would overflow.
    Overflow,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::Encoding => "encoding",
            Rejection::InvalidAmount => "invalid_amount",
            Rejection::CryptoInvalid => "crypto_invalid",
            Rejection::VerificationError => "verification_error",
            Rejection::ReplayDetected => "replay_detected",
            Rejection::UnknownSender => "unknown_sender",
            Rejection::InsufficientFunds => "insufficient_funds",
            Rejection::Overflow => "overflow",
        }
    }
}

/// The business result of a settlement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Valid(TransferReceipt),
    Invalid(Rejection),
}

impl SettlementOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, SettlementOutcome::Valid(_))
    }

    /// The client-facing message: `"Valid"` or `"Invalid"`, nothing more.
    pub fn message(&self) -> &'static str {
        if self.is_valid() {
            "Valid"
        } else {
            "Invalid"
        }
    }
}

/// Failures that leave the outcome of a settlement unknown.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// The settlement pipeline over one store.
pub struct Settlement<S: ?Sized> {
    nonces: NonceLedger<S>,
    wallets: WalletLedger<S>,
    scheme: SignatureScheme,
}

impl<S: ?Sized> Clone for Settlement<S> {
    fn clone(&self) -> Self {
        Self {
            nonces: self.nonces.clone(),
            wallets: self.wallets.clone(),
            scheme: self.scheme,
        }
    }
}

impl<S: WalletStore + NonceStore + ?Sized> Settlement<S> {
    /// A pipeline verifying secp256k1 signatures.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            nonces: NonceLedger::new(Arc::clone(&store)),
            wallets: WalletLedger::new(store),
            scheme: SignatureScheme::Secp256k1,
        }
    }

    /// Verify under `scheme` instead of secp256k1.
    pub fn with_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn wallets(&self) -> &WalletLedger<S> {
        &self.wallets
    }

    /// Settle a raw JSON request body. A body that doesn't decode is an
    /// `Invalid` outcome, not an error.
    pub fn settle_json(&self, body: &str) -> Result<SettlementOutcome, SettlementError> {
        match serde_json::from_str::<SignedTransaction>(body) {
            Ok(request) => self.settle(&request),
            Err(e) => {
                debug!(error = %e, "undecodable settlement request");
                Ok(SettlementOutcome::Invalid(Rejection::Encoding))
            }
        }
    }

    /// Settle a decoded request.
    pub fn settle(&self, request: &SignedTransaction) -> Result<SettlementOutcome, SettlementError> {
        let tx = &request.transaction;

        let message = match canonical_message(tx) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "transaction failed to canonicalize");
                return Ok(reject(Rejection::Encoding));
            }
        };

        let amount = match tx.amount_units() {
            Ok(amount) => amount,
            Err(e) => {
                debug!(error = %e, "bad amount");
                return Ok(reject(Rejection::InvalidAmount));
            }
        };

        match verify(self.scheme, &request.signature, &tx.from, &message) {
            Ok(Verification::Valid) => {}
            Ok(Verification::Invalid) => return Ok(reject(Rejection::CryptoInvalid)),
            Err(e) => {
                warn!(error = %e, "signature could not be verified");
                return Ok(reject(Rejection::VerificationError));
            }
        }

        if self.nonces.check_and_consume(&tx.nonce)? {
            return Ok(reject(Rejection::ReplayDetected));
        }

        self.wallets.ensure_wallet(&tx.to)?;

        match self.wallets.transfer(&tx.from, &tx.to, amount) {
            Ok(receipt) => {
                info!(nonce = %tx.nonce, amount, "settlement accepted");
                Ok(SettlementOutcome::Valid(receipt))
            }
            Err(LedgerError::InsufficientFunds { .. }) => Ok(reject(Rejection::InsufficientFunds)),
            Err(LedgerError::UnknownWallet(_)) => Ok(reject(Rejection::UnknownSender)),
            Err(LedgerError::Overflow(_)) => Ok(reject(Rejection::Overflow)),
            Err(LedgerError::InvalidAmount) => Ok(reject(Rejection::InvalidAmount)),
            Err(LedgerError::Store(e)) => Err(e.into()),
        }
    }
}

fn reject(reason: Rejection) -> SettlementOutcome {
    debug!(reason = reason.as_str(), "settlement rejected");
    SettlementOutcome::Invalid(reason)
}
