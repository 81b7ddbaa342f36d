//! Merkle root over transaction IDs.
//!
//! Each level pairs adjacent hashes and takes SHA-256 over the concatenation
//! of their hex renderings, duplicating the last element when a level has odd
//! length. An empty transaction list yields SHA-256 of the empty string.

use sha2::{Digest, Sha256};

use crate::types::Hash256;

/// Hash a pair of nodes: `SHA256(hex(left) || hex(right))`.
fn pair_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left.to_string().as_bytes());
    hasher.update(right.to_string().as_bytes());
    Hash256(hasher.finalize().into())
}

/// Compute the merkle root of a list of transaction IDs.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256(Sha256::digest(b"").into());
    }

    let mut level: Vec<Hash256> = txids.to_vec();
    if level.len() == 1 {
        // A lone txid still folds once, paired with itself.
        return pair_hash(&level[0], &level[0]);
    }
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i < level.len() {
            let left = &level[i];
            let right = if i + 1 < level.len() { &level[i + 1] } else { left };
            next.push(pair_hash(left, right));
            i += 2;
        }
        level = next;
    }
    level[0]
}
