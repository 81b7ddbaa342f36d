//! Base58Check addresses.
//!
//! An address is `Base58Check(version || HASH160(pubkey))` with version byte
//! 0x00 and a 4-byte double-SHA-256 checksum, the Bitcoin P2PKH scheme.
//! Outputs carry addresses as plain strings on the wire; [`Address`] is the
//! validated form used by the wallet and node APIs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::ADDRESS_VERSION;
use crate::crypto::PublicKey;
use crate::error::AddressError;

/// A Base58Check-encoded pay-to-pubkey-hash address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Derive the address of a public key.
    pub fn from_pubkey(pubkey: &PublicKey) -> Self {
        let mut versioned = Vec::with_capacity(25);
        versioned.push(ADDRESS_VERSION);
        versioned.extend_from_slice(&pubkey.hash160());
        let check = checksum(&versioned);
        versioned.extend_from_slice(&check);
        Self(bs58::encode(versioned).into_string())
    }

    /// Wrap a raw string without validation.
    ///
    /// Needed for sentinel addresses that are not Base58Check (the genesis
    /// output). Everything user-supplied should go through [`FromStr`].
    pub fn raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Decode and validate a Base58Check address.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
        if bytes.len() != 25 {
            return Err(AddressError::InvalidLength(bytes.len()));
        }
        let (payload, check) = bytes.split_at(21);
        if payload[0] != ADDRESS_VERSION {
            return Err(AddressError::UnknownVersion(payload[0]));
        }
        if checksum(payload) != check {
            return Err(AddressError::InvalidChecksum);
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// First 4 bytes of double SHA-256.
fn checksum(payload: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..4].try_into().expect("digest is 32 bytes")
}

/// Derive the address string for a hex-encoded public key.
///
/// Used during transaction verification to check that an input's pubkey
/// hashes to the referenced output's address.
pub fn pubkey_to_address(pubkey_hex: &str) -> Result<String, crate::error::CryptoError> {
    let pk = PublicKey::from_hex(pubkey_hex)?;
    Ok(Address::from_pubkey(&pk).0)
}
