//! # Signature Verification
//!
//! One entry point, [`verify`], for both signature schemes the node accepts.
//! The scheme is an explicit [`SignatureScheme`] argument rather than a
//! separate function per curve, so call sites can't quietly grow their own
//! slightly different verifier.
//!
//! ## Three outcomes, not two
//!
//! A signature that is well-formed but mathematically wrong is a *result*
//! ([`Verification::Invalid`]). A signature or key that can't even be decoded
//! is an *error* ([`SignatureError`]). Callers that authorize money movement
//! must treat both the same way: only [`Verification::Valid`] authorizes.
//!
//! ## Schemes
//!
//! - **secp256k1**: public key is base64 of raw SEC1 bytes (33-byte
//!   compressed or 65-byte uncompressed), signature is base64 DER. The
//!   message is hashed with SHA-256 and the digest is verified directly.
//!   High-S signatures are accepted; they are normalized before verification.
//! - **RSA**: public key is base64 DER `SubjectPublicKeyInfo` without armour.
//!   It is wrapped into a 64-column PEM block and parsed as a PKIX key. The
//!   signature is PKCS#1 v1.5 over the SHA-256 digest.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature as EcSignature, VerifyingKey};
use rsa::pkcs8::der::Decode;
use rsa::pkcs8::spki::{ObjectIdentifier, SubjectPublicKeyInfoRef};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use super::hash::sha256;
use crate::config::PEM_LINE_WIDTH;

/// `id-ecPublicKey` (RFC 5480).
const EC_PUBLIC_KEY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");

/// Errors that prevent a verification from producing a yes/no answer.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature is not valid base64: {0}")]
    SignatureEncoding(base64::DecodeError),

    #[error("public key is not valid base64: {0}")]
    PublicKeyEncoding(base64::DecodeError),

    #[error("signature is not a valid DER ECDSA signature")]
    MalformedSignature,

    #[error("public key could not be parsed")]
    InvalidPublicKey,

    #[error("public key type does not match the {0} scheme")]
    WrongKeyType(SignatureScheme),
}

/// The signature scheme a verification request is made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    /// ECDSA over secp256k1. Used for settlement.
    Secp256k1,
    /// RSA PKCS#1 v1.5 with SHA-256.
    Rsa,
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secp256k1 => write!(f, "secp256k1"),
            Self::Rsa => write!(f, "rsa"),
        }
    }
}

impl FromStr for SignatureScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ec" | "ecdsa" | "secp256k1" => Ok(Self::Secp256k1),
            "rsa" => Ok(Self::Rsa),
            other => Err(format!("unknown signature scheme: {other}")),
        }
    }
}

/// The answer to a well-formed verification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid,
}

impl Verification {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

/// Verify a base64 signature over `message` against a base64 public key.
///
/// `message` is the exact byte string the client signed, normally the
/// canonical transaction JSON.
pub fn verify(
    scheme: SignatureScheme,
    signature_b64: &str,
    public_key_b64: &str,
    message: &str,
) -> Result<Verification, SignatureError> {
    let signature = STANDARD
        .decode(signature_b64.trim())
        .map_err(SignatureError::SignatureEncoding)?;
    let public_key = STANDARD
        .decode(public_key_b64.trim())
        .map_err(SignatureError::PublicKeyEncoding)?;

    match scheme {
        SignatureScheme::Secp256k1 => verify_secp256k1(&signature, &public_key, message.as_bytes()),
        SignatureScheme::Rsa => verify_rsa(&signature, public_key_b64, &public_key, message.as_bytes()),
    }
}

fn verify_secp256k1(
    signature: &[u8],
    public_key: &[u8],
    message: &[u8],
) -> Result<Verification, SignatureError> {
    let key = VerifyingKey::from_sec1_bytes(public_key).map_err(|_| {
        // An RSA SPKI blob handed to the curve scheme is a caller mistake
        // worth naming; anything else is just garbage.
        match spki_algorithm(public_key) {
            Some(oid) if oid != EC_PUBLIC_KEY_OID => {
                SignatureError::WrongKeyType(SignatureScheme::Secp256k1)
            }
            _ => SignatureError::InvalidPublicKey,
        }
    })?;

    let sig = EcSignature::from_der(signature).map_err(|_| SignatureError::MalformedSignature)?;
    let sig = sig.normalize_s().unwrap_or(sig);

    let digest = sha256(message);
    Ok(match key.verify_prehash(&digest, &sig) {
        Ok(()) => Verification::Valid,
        Err(_) => Verification::Invalid,
    })
}

fn verify_rsa(
    signature: &[u8],
    public_key_b64: &str,
    public_key_der: &[u8],
    message: &[u8],
) -> Result<Verification, SignatureError> {
    let pem = format_pem_public_key(public_key_b64);
    let key = RsaPublicKey::from_public_key_pem(&pem).map_err(|_| {
        match spki_algorithm(public_key_der) {
            Some(oid) if oid != rsa::pkcs1::ALGORITHM_OID => {
                SignatureError::WrongKeyType(SignatureScheme::Rsa)
            }
            _ => SignatureError::InvalidPublicKey,
        }
    })?;

    let digest = sha256(message);
    Ok(
        match key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature) {
            Ok(()) => Verification::Valid,
            Err(_) => Verification::Invalid,
        },
    )
}

/// The algorithm OID of a DER `SubjectPublicKeyInfo`, if `der` is one.
fn spki_algorithm(der: &[u8]) -> Option<ObjectIdentifier> {
    SubjectPublicKeyInfoRef::from_der(der)
        .ok()
        .map(|spki| spki.algorithm.oid)
}

/// Wrap a raw base64 public key into a PEM `PUBLIC KEY` block.
///
/// Whitespace in the input is dropped and the body is re-flowed to
/// [`PEM_LINE_WIDTH`] columns.
pub fn format_pem_public_key(raw_b64: &str) -> String {
    let body: String = raw_b64.chars().filter(|c| !c.is_whitespace()).collect();

    let mut pem = String::with_capacity(body.len() + body.len() / PEM_LINE_WIDTH + 64);
    pem.push_str("-----BEGIN PUBLIC KEY-----\n");
    for line in body.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 is ASCII, so every chunk boundary is a char boundary.
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END PUBLIC KEY-----\n");
    pem
}
