//! Core protocol types: transactions, blocks, hashes.
//!
//! Monetary amounts and timestamps are `f64` — the wire and storage formats
//! are JSON, and both the block payload and the coinbase reward (10.2 KAR)
//! are fractional. Hashes are 32-byte values rendered as 64-char lowercase
//! hex in JSON.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;

use crate::canonical;
use crate::difficulty;
use crate::error::TransactionError;
use crate::merkle;

/// A 32-byte hash value.
///
/// Used for transaction IDs, merkle roots, and block hashes (all SHA-256).
/// Serializes as a 64-character lowercase hex string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (64 hex zeros). Previous-hash sentinel of the genesis block.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Parse from a 64-char hex string.
    pub fn from_hex(s: &str) -> Result<Self, TransactionError> {
        let bytes = hex::decode(s).map_err(|e| TransactionError::Serialization(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransactionError::Serialization(format!("bad hash length in {s:?}")))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A transaction input, spending one output of a prior transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TxInput {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within that transaction.
    pub vout: usize,
    /// Hex-encoded compressed secp256k1 public key of the spender.
    pub pubkey: String,
    /// Hex-encoded compact ECDSA signature over the txid. Empty until signed.
    #[serde(default)]
    pub signature: String,
}

/// A transaction output, paying `amount` to `address`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TxOutput {
    pub address: String,
    pub amount: f64,
}

/// A UTXO transaction.
///
/// The txid commits to inputs (without signatures), outputs, and timestamp,
/// so attaching signatures cannot change it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Unix timestamp in float seconds.
    pub timestamp: f64,
    pub txid: Hash256,
}

impl Transaction {
    /// Construct a transaction, computing its txid.
    ///
    /// Rejects negative output amounts and empty output lists (policy).
    pub fn new(
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
        timestamp: f64,
    ) -> Result<Self, TransactionError> {
        for (i, out) in outputs.iter().enumerate() {
            if out.amount < 0.0 || !out.amount.is_finite() {
                return Err(TransactionError::NegativeAmount(i));
            }
        }
        if outputs.is_empty() {
            return Err(TransactionError::EmptyOutputs);
        }
        let mut tx = Self {
            inputs,
            outputs,
            timestamp,
            txid: Hash256::ZERO,
        };
        tx.txid = tx.compute_txid();
        Ok(tx)
    }

    /// Build a coinbase transaction paying `reward` to `address`.
    pub fn coinbase(address: &str, reward: f64, timestamp: f64) -> Self {
        // reward is a protocol constant, never negative
        Self::new(
            Vec::new(),
            vec![TxOutput {
                address: address.to_string(),
                amount: reward,
            }],
            timestamp,
        )
        .expect("coinbase outputs are well-formed")
    }

    /// Compute the canonical txid: SHA-256 over the sorted-key JSON of
    /// `{inputs-without-signatures, outputs, timestamp}`.
    pub fn compute_txid(&self) -> Hash256 {
        let inputs_clean: Vec<serde_json::Value> = self
            .inputs
            .iter()
            .map(|inp| json!({"txid": inp.txid, "vout": inp.vout, "pubkey": inp.pubkey}))
            .collect();
        canonical::hash_value(&json!({
            "inputs": inputs_clean,
            "outputs": self.outputs,
            "timestamp": self.timestamp,
        }))
    }

    /// A coinbase transaction has no inputs.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Sum of all output amounts.
    pub fn total_output_value(&self) -> f64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

/// A block: header fields plus the transaction list.
///
/// The hash covers `{index, timestamp, merkle_root, previous_hash, nonce}`;
/// transactions bind to the header through the merkle root only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Block {
    /// 0-based height.
    pub index: u64,
    /// Unix timestamp in float seconds.
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: Hash256,
    pub nonce: u64,
    pub merkle_root: Hash256,
    pub hash: Hash256,
}

impl Block {
    /// Construct a block, computing its merkle root and hash (nonce 0).
    pub fn new(
        index: u64,
        timestamp: f64,
        transactions: Vec<Transaction>,
        previous_hash: Hash256,
    ) -> Self {
        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid).collect();
        let merkle_root = merkle::merkle_root(&txids);
        let mut block = Self {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            merkle_root,
            hash: Hash256::ZERO,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Compute the header hash: SHA-256 over the sorted-key JSON of
    /// `{index, timestamp, merkle_root, previous_hash, nonce}`.
    pub fn compute_hash(&self) -> Hash256 {
        canonical::hash_value(&json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "merkle_root": self.merkle_root,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
        }))
    }

    /// Recompute the merkle root from the current transaction list.
    pub fn compute_merkle_root(&self) -> Hash256 {
        let txids: Vec<Hash256> = self.transactions.iter().map(|tx| tx.txid).collect();
        merkle::merkle_root(&txids)
    }

    /// Solve the proof-of-work puzzle: increment the nonce until the hash
    /// has at least `target` leading zero hex digits, or `cancel` is set.
    ///
    /// Returns `false` when cancelled; the block is left at the last nonce
    /// tried. The flag is polled between every nonce attempt.
    pub fn mine(&mut self, target: u32, cancel: &AtomicBool) -> bool {
        loop {
            if difficulty::meets_difficulty(&self.hash, target) {
                return true;
            }
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            self.nonce += 1;
            self.hash = self.compute_hash();
        }
    }
}
