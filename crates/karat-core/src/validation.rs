//! Transaction, block, and chain validation rules.
//!
//! Transaction verification is enforced at two points: when a transaction is
//! submitted to the pending pool, and again when a block is admitted (the
//! UTXO apply re-checks references). Block and chain validation cover the
//! header invariants: merkle root, header hash, proof-of-work at the
//! difficulty in force at the block's height, previous-hash linkage, and
//! the two timestamp rules.

use crate::address;
use crate::constants::{MAX_FUTURE_DRIFT_SECS, MEDIAN_TIME_WINDOW};
use crate::difficulty;
use crate::error::{BlockError, ChainError, TransactionError};
use crate::types::{Block, Transaction};
use crate::utxo::UtxoSet;

/// Verify a transaction against the current UTXO set.
///
/// Coinbase transactions (no inputs) are exempt from witness checks; the
/// engine only ever constructs them itself. For every other input:
/// the referenced output must exist and be unspent, the supplied pubkey
/// must hash to the referenced output's address, and the signature must
/// verify against the txid.
pub fn verify_transaction(tx: &Transaction, utxo: &UtxoSet) -> Result<(), TransactionError> {
    let computed = tx.compute_txid();
    if computed != tx.txid {
        return Err(TransactionError::TxidMismatch {
            stored: tx.txid.to_string(),
            computed: computed.to_string(),
        });
    }
    for (i, out) in tx.outputs.iter().enumerate() {
        if out.amount < 0.0 || !out.amount.is_finite() {
            return Err(TransactionError::NegativeAmount(i));
        }
    }

    for (index, inp) in tx.inputs.iter().enumerate() {
        if inp.signature.is_empty() || inp.pubkey.is_empty() {
            return Err(TransactionError::MissingWitness { index });
        }
        let referenced = utxo.output(&inp.txid, inp.vout).ok_or_else(|| {
            TransactionError::UnknownUtxo(format!("{}:{}", inp.txid, inp.vout))
        })?;

        let derived = address::pubkey_to_address(&inp.pubkey)
            .map_err(|_| TransactionError::AddressMismatch { index })?;
        if derived != referenced.address {
            return Err(TransactionError::AddressMismatch { index });
        }

        let pubkey = crate::crypto::PublicKey::from_hex(&inp.pubkey)
            .map_err(|_| TransactionError::InvalidSignature { index })?;
        pubkey
            .verify_txid(&tx.txid, &inp.signature)
            .map_err(|_| TransactionError::InvalidSignature { index })?;
    }
    Ok(())
}

/// Validate a block's header invariants against an expected difficulty.
///
/// Structurally, the first transaction must be the coinbase and no other
/// transaction may be one.
pub fn validate_block(block: &Block, expected_difficulty: u32) -> Result<(), BlockError> {
    match block.transactions.first() {
        Some(first) if first.is_coinbase() => {}
        _ => return Err(BlockError::MissingCoinbase),
    }
    if block.transactions.iter().skip(1).any(Transaction::is_coinbase) {
        return Err(BlockError::MultipleCoinbase);
    }
    if block.compute_merkle_root() != block.merkle_root {
        return Err(BlockError::MerkleMismatch);
    }
    if block.compute_hash() != block.hash {
        return Err(BlockError::HashMismatch);
    }
    if !difficulty::meets_difficulty(&block.hash, expected_difficulty) {
        return Err(BlockError::InvalidPoW {
            difficulty: expected_difficulty,
        });
    }
    Ok(())
}

/// Median timestamp of up to [`MEDIAN_TIME_WINDOW`] blocks preceding `index`.
///
/// `None` when there are no preceding blocks.
pub fn median_time_past(chain: &[Block], index: usize) -> Option<f64> {
    if index == 0 {
        return None;
    }
    let start = index.saturating_sub(MEDIAN_TIME_WINDOW);
    let mut times: Vec<f64> = chain[start..index.min(chain.len())]
        .iter()
        .map(|b| b.timestamp)
        .collect();
    if times.is_empty() {
        return None;
    }
    times.sort_by(|a, b| a.partial_cmp(b).expect("block timestamps are finite"));
    let mid = times.len() / 2;
    if times.len() % 2 == 1 {
        Some(times[mid])
    } else {
        Some((times[mid - 1] + times[mid]) / 2.0)
    }
}

/// Validate a block's timestamp against the two consensus rules:
/// no more than two hours ahead of `now` (exactly two hours is accepted),
/// and for non-genesis blocks not earlier than the median time past of the
/// preceding blocks in `chain`.
pub fn validate_timestamp(block: &Block, chain: &[Block], now: f64) -> Result<(), BlockError> {
    if block.timestamp > now + MAX_FUTURE_DRIFT_SECS {
        return Err(BlockError::TimestampTooFar);
    }
    if block.index > 0 {
        if let Some(median) = median_time_past(chain, block.index as usize) {
            if block.timestamp < median {
                return Err(BlockError::TimestampBeforeMedian);
            }
        }
    }
    Ok(())
}

/// Validate a whole chain.
///
/// For every block at index i ≥ 1: timestamp rules, recomputed hash, link
/// to the previous block, and PoW at the difficulty in force at height i.
/// The genesis block is checked for the future-drift rule only. On failure
/// reports the first failing index.
pub fn validate_chain(
    chain: &[Block],
    base_difficulty: u32,
    difficulty_interval: u64,
    now: f64,
) -> Result<(), ChainError> {
    if let Some(genesis) = chain.first() {
        validate_timestamp(genesis, chain, now)
            .map_err(|source| ChainError::InvalidBlock { index: 0, source })?;
    }
    for i in 1..chain.len() {
        let block = &chain[i];
        let fail = |source| ChainError::InvalidBlock {
            index: i as u64,
            source,
        };

        validate_timestamp(block, chain, now).map_err(fail)?;
        if block.index != i as u64 {
            return Err(fail(BlockError::IndexMismatch {
                expected: i as u64,
                actual: block.index,
            }));
        }
        if block.previous_hash != chain[i - 1].hash {
            return Err(fail(BlockError::InvalidPrevHash));
        }
        let expected = difficulty::difficulty_at(base_difficulty, difficulty_interval, i as u64);
        validate_block(block, expected).map_err(fail)?;
    }
    Ok(())
}
