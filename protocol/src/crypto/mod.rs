//! # Cryptographic Primitives
//!
//! Everything the node needs to decide whether a payload was really signed by
//! the key it claims to come from, and nothing more:
//!
//! - **SHA-256** for message digests and node identifiers.
//! - **secp256k1 ECDSA** for settlement signatures.
//! - **RSA PKCS#1 v1.5** for the legacy verification path.
//!
//! None of this is hand-rolled. The curve and RSA math come from `k256` and
//! `rsa`; this module only fixes the encodings the wire format uses.

pub mod hash;
pub mod keys;
pub mod signatures;

pub use hash::{computer_id, sha256, sha256_hex};
pub use keys::{EcKeypair, KeyError, RsaKeypair};
pub use signatures::{format_pem_public_key, verify, SignatureError, SignatureScheme, Verification};
