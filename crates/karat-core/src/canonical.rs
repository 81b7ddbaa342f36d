//! Canonical JSON hashing preimages.
//!
//! Transaction IDs and block hashes are SHA-256 over a compact JSON
//! serialization with lexicographically sorted object keys. serde_json's
//! default `Map` is BTreeMap-backed, so converting any serializable value
//! through [`serde_json::Value`] yields sorted keys at every nesting level.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::TransactionError;
use crate::types::Hash256;

/// SHA-256 over the compact, sorted-key JSON rendering of `value`.
pub fn hash_value(value: &Value) -> Hash256 {
    let rendered = value.to_string();
    Hash256(Sha256::digest(rendered.as_bytes()).into())
}

/// Convert any serializable payload to a [`Value`] and hash it canonically.
pub fn hash_serializable<T: serde::Serialize>(payload: &T) -> Result<Hash256, TransactionError> {
    let value =
        serde_json::to_value(payload).map_err(|e| TransactionError::Serialization(e.to_string()))?;
    Ok(hash_value(&value))
}
