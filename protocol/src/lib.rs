// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Sidechain Protocol: Core Library
//!
//! Everything a sidechain node does that isn't HTTP plumbing: verifying
//! signed transfers, settling them against a wallet ledger exactly once,
//! admitting new nodes, gossiping membership between nodes, and sharding
//! the confirmed set into groups.
//!
//! ## Architecture
//!
//! - **crypto**: hashing, key pairs, and signature verification for the two
//!   supported schemes (secp256k1 ECDSA and RSA PKCS#1 v1.5).
//! - **transaction**: the wire format, canonical JSON, and the settlement
//!   pipeline that turns a signed request into a valid/invalid verdict.
//! - **ledger**: wallet balances and the nonce replay ledger.
//! - **network**: peer calls, node admission, gossip sync, shard assignment.
//! - **storage**: store traits plus a sled-backed and an in-memory adapter.
//! - **config**: protocol constants and endpoint paths.
//!
//! ## Ground rules
//!
//! 1. The store is the only shared state. Every multi-step mutation is a
//!    single store transaction.
//! 2. A nonce is spent once, ever, and only by a correctly signed request.
//! 3. No peer can stall a gossip cycle; every outbound call has a deadline.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod network;
pub mod storage;
pub mod transaction;
