//! # Hashing Utilities
//!
//! SHA-256 is the only digest the node speaks. Signed transaction payloads
//! are hashed with it before curve or RSA verification, node identifiers are
//! derived from it, and the registry digest is computed with it. Peers
//! running the same code must agree on every byte, so there is no room for a
//! second hash function here.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use sidechain_protocol::crypto::sha256;
///
/// let hash = sha256(b"sidechain");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of `data`, hex-encoded (lowercase).
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Derive a node's stable identifier from the address it is reached at.
///
/// The address is the `host:port` string the node announced itself with, so
/// the same node always lands on the same row key in every node table.
pub fn computer_id(ip_address: &str) -> String {
    sha256_hex(ip_address.as_bytes())
}
