//! # Key Management
//!
//! Keypair generation and serialization for the two signature schemes the
//! node accepts:
//!
//! - **secp256k1 ECDSA** ([`EcKeypair`]): the settlement scheme. Public
//!   keys travel as raw SEC1 point bytes (not PEM), base64-encoded. The
//!   base64 public key doubles as the wallet address.
//! - **RSA PKCS#1 v1.5** ([`RsaKeypair`]): the legacy scheme. Public keys
//!   travel as base64 DER `SubjectPublicKeyInfo`, which the verifier wraps
//!   into a PEM block before parsing.
//!
//! Both keypairs sign the SHA-256 digest of the message, matching what
//! [`super::signatures::verify`] checks.
//!
//! Key bytes are never logged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature as EcSignature, SigningKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

use super::hash::sha256;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid base64 key encoding: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("key generation failed: {0}")]
    Generation(String),

    #[error("key export failed: {0}")]
    Export(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

// ---------------------------------------------------------------------------
// secp256k1
// ---------------------------------------------------------------------------

/// A secp256k1 ECDSA keypair.
///
/// Intentionally not `Serialize`. Exporting a secret key should be a
/// deliberate call to [`EcKeypair::secret_key_base64`].
///
/// # Examples
///
/// ```
/// use sidechain_protocol::crypto::keys::EcKeypair;
/// use sidechain_protocol::crypto::signatures::{verify, SignatureScheme, Verification};
///
/// let kp = EcKeypair::generate();
/// let msg = r#"{"amount":"10","from":"a","nonce":"1","to":"b"}"#;
/// let sig = kp.sign_base64(msg.as_bytes());
///
/// let result = verify(SignatureScheme::Secp256k1, &sig, &kp.public_key_base64(), msg).unwrap();
/// assert_eq!(result, Verification::Valid);
/// ```
pub struct EcKeypair {
    signing_key: SigningKey,
}

impl EcKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from a 32-byte big-endian secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let signing_key = SigningKey::from_slice(bytes).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { signing_key })
    }

    /// Reconstruct a keypair from a base64-encoded secret scalar, the format
    /// printed by `keygen`.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        Self::from_secret_bytes(&bytes)
    }

    /// The secret scalar, base64-encoded.
    pub fn secret_key_base64(&self) -> String {
        STANDARD.encode(self.signing_key.to_bytes())
    }

    /// SEC1 public key bytes: 65 bytes uncompressed or 33 bytes compressed.
    pub fn public_key_bytes(&self, compressed: bool) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(compressed)
            .as_bytes()
            .to_vec()
    }

    /// Base64 of the uncompressed public key. This string is the wallet
    /// address and the `from` field of every transaction this key signs.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public_key_bytes(false))
    }

    /// Sign `message` (SHA-256, RFC 6979 nonce) and return the DER-encoded
    /// signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: EcSignature = self.signing_key.sign(message);
        signature.to_der().as_bytes().to_vec()
    }

    /// Sign `message` and return the DER signature base64-encoded.
    pub fn sign_base64(&self, message: &[u8]) -> String {
        STANDARD.encode(self.sign(message))
    }
}

// ---------------------------------------------------------------------------
// RSA
// ---------------------------------------------------------------------------

/// An RSA keypair for the PKCS#1 v1.5 scheme.
pub struct RsaKeypair {
    private_key: RsaPrivateKey,
}

impl RsaKeypair {
    /// Generate a fresh keypair with a modulus of `bits` bits.
    ///
    /// Slow for 2048+ bits in debug builds; tests use smaller moduli.
    pub fn generate(bits: usize) -> Result<Self, KeyError> {
        let private_key =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(Self { private_key })
    }

    /// Reconstruct a keypair from base64 PKCS#8 DER.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let der = STANDARD.decode(encoded.trim())?;
        let private_key =
            RsaPrivateKey::from_pkcs8_der(&der).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self { private_key })
    }

    /// The private key as base64 PKCS#8 DER.
    pub fn secret_key_base64(&self) -> Result<String, KeyError> {
        let der = self
            .private_key
            .to_pkcs8_der()
            .map_err(|e| KeyError::Export(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    /// The public key as base64 DER `SubjectPublicKeyInfo`, without PEM
    /// armour. This is the form clients submit.
    pub fn public_key_base64(&self) -> Result<String, KeyError> {
        let public_key = RsaPublicKey::from(&self.private_key);
        let der = public_key
            .to_public_key_der()
            .map_err(|e| KeyError::Export(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    /// Sign the SHA-256 digest of `message` with PKCS#1 v1.5 padding.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, KeyError> {
        let digest = sha256(message);
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| KeyError::Signing(e.to_string()))
    }

    /// Sign `message` and return the signature base64-encoded.
    pub fn sign_base64(&self, message: &[u8]) -> Result<String, KeyError> {
        Ok(STANDARD.encode(self.sign(message)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ec_public_key_lengths() {
        let kp = EcKeypair::generate();
        assert_eq!(kp.public_key_bytes(false).len(), 65);
        assert_eq!(kp.public_key_bytes(true).len(), 33);
        assert_eq!(kp.public_key_bytes(false)[0], 0x04);
    }

    #[test]
    fn ec_secret_roundtrip_preserves_public_key() {
        let kp = EcKeypair::generate();
        let restored = EcKeypair::from_base64(&kp.secret_key_base64()).unwrap();
        assert_eq!(kp.public_key_base64(), restored.public_key_base64());
    }

    #[test]
    fn ec_rejects_zero_scalar() {
        assert!(matches!(
            EcKeypair::from_secret_bytes(&[0u8; 32]),
            Err(KeyError::InvalidSecretKey)
        ));
    }

    #[test]
    fn ec_signature_is_der() {
        let kp = EcKeypair::generate();
        let sig = kp.sign(b"payload");
        // DER SEQUENCE tag.
        assert_eq!(sig[0], 0x30);
        assert!(EcSignature::from_der(&sig).is_ok());
    }

    #[test]
    fn rsa_secret_roundtrip_preserves_public_key() {
        let kp = RsaKeypair::generate(1024).unwrap();
        let restored = RsaKeypair::from_base64(&kp.secret_key_base64().unwrap()).unwrap();
        assert_eq!(
            kp.public_key_base64().unwrap(),
            restored.public_key_base64().unwrap()
        );
    }

    #[test]
    fn bad_base64_is_encoding_error() {
        assert!(matches!(
            EcKeypair::from_base64("not base64!!"),
            Err(KeyError::InvalidEncoding(_))
        ));
    }
}
