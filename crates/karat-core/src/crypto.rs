//! secp256k1 ECDSA operations for the Karat protocol.
//!
//! Key generation, transaction signing, and signature verification, plus the
//! HASH160 (RIPEMD-160 over SHA-256) pubkey digest used for addresses.
//!
//! # Signing scheme
//!
//! The message for every input of a transaction is the transaction's txid.
//! The txid excludes signatures by construction, so signing cannot change
//! it and a single signature covers the whole transaction. ECDSA operates
//! on a 32-byte digest: SHA-256 over the txid's hex rendering.

use std::fmt;

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, SECP256K1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;
use crate::types::Hash256;

/// secp256k1 keypair for signing transactions.
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: secp256k1::PublicKey,
}

impl KeyPair {
    /// Generate a random keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        let (secret_key, public_key) = SECP256K1.generate_keypair(&mut rand::thread_rng());
        Self {
            secret_key,
            public_key,
        }
    }

    /// Rebuild a keypair from 32-byte secret key material.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public_key = secp256k1::PublicKey::from_secret_key(SECP256K1, &secret_key);
        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Rebuild a keypair from a hex-encoded secret key.
    pub fn from_secret_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidSecretKey)?;
        Self::from_secret_bytes(&arr)
    }

    /// The raw secret key bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.public_key)
    }

    /// Sign a txid, returning the compact 64-byte ECDSA signature.
    pub fn sign_txid(&self, txid: &Hash256) -> [u8; 64] {
        let msg = txid_message(txid);
        SECP256K1
            .sign_ecdsa(&msg, &self.secret_key)
            .serialize_compact()
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self {
            secret_key: self.secret_key,
            public_key: self.public_key,
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// secp256k1 public key for verifying signatures and deriving addresses.
///
/// Serialized in the 33-byte compressed encoding everywhere (wire, address
/// derivation, wallet files).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Parse a public key from its compressed-encoding hex.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        let pk = secp256k1::PublicKey::from_slice(&bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(pk))
    }

    /// The 33-byte compressed encoding.
    pub fn to_bytes(&self) -> [u8; 33] {
        self.0.serialize()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// HASH160 of the compressed encoding, as used in address derivation.
    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.to_bytes())
    }

    /// Verify a hex-encoded compact ECDSA signature over a txid.
    pub fn verify_txid(&self, txid: &Hash256, signature_hex: &str) -> Result<(), CryptoError> {
        let sig_bytes =
            hex::decode(signature_hex).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        let sig =
            Signature::from_compact(&sig_bytes).map_err(|_| CryptoError::InvalidSignature)?;
        let msg = txid_message(txid);
        SECP256K1
            .verify_ecdsa(&msg, &sig, &self.0)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// RIPEMD-160 over SHA-256.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    ripemd::Ripemd160::digest(sha).into()
}

/// The 32-byte ECDSA message digest for a txid: SHA-256 of its hex form.
fn txid_message(txid: &Hash256) -> Message {
    let digest: [u8; 32] = Sha256::digest(txid.to_string().as_bytes()).into();
    Message::from_digest(digest)
}
