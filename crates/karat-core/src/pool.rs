//! Pending pool of transactions awaiting inclusion in a block.
//!
//! Admission order is preserved — the miner drains the pool in the order
//! transactions were first accepted. A spent-outpoint index rejects a
//! second pending transaction that tries to consume an outpoint already
//! claimed by the pool.

use std::collections::{HashMap, HashSet};

use crate::error::ChainError;
use crate::types::{Hash256, Transaction};
use crate::utxo::OutPoint;

/// Ordered pool of admitted, not-yet-mined transactions.
#[derive(Debug, Default)]
pub struct PendingPool {
    /// Transactions in admission order.
    entries: Vec<Transaction>,
    /// Fast duplicate check.
    txids: HashSet<Hash256>,
    /// Outpoint → txid of the pending transaction spending it.
    by_outpoint: HashMap<OutPoint, Hash256>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transaction. The caller has already verified it against the
    /// UTXO set; the pool only rejects duplicates and internal conflicts.
    pub fn admit(&mut self, tx: Transaction) -> Result<(), ChainError> {
        if self.txids.contains(&tx.txid) {
            return Err(ChainError::DuplicateTransaction(tx.txid.to_string()));
        }
        for inp in &tx.inputs {
            if let Some(existing) = self.by_outpoint.get(&(inp.txid, inp.vout)) {
                return Err(ChainError::PendingConflict(existing.to_string()));
            }
        }
        for inp in &tx.inputs {
            self.by_outpoint.insert((inp.txid, inp.vout), tx.txid);
        }
        self.txids.insert(tx.txid);
        self.entries.push(tx);
        Ok(())
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.txids.contains(txid)
    }

    /// Snapshot the pool contents in admission order without draining.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.clone()
    }

    /// Empty the pool (successful mine or chain replacement).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.txids.clear();
        self.by_outpoint.clear();
    }

    /// Drop entries that a newly admitted block made stale: transactions the
    /// block included, and transactions whose inputs the block spent.
    pub fn prune_for_block(&mut self, block: &crate::types::Block) {
        let included: HashSet<Hash256> =
            block.transactions.iter().map(|tx| tx.txid).collect();
        let spent: HashSet<OutPoint> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.inputs.iter().map(|inp| (inp.txid, inp.vout)))
            .collect();

        let entries = std::mem::take(&mut self.entries);
        self.txids.clear();
        self.by_outpoint.clear();
        for tx in entries {
            if included.contains(&tx.txid) {
                continue;
            }
            if tx.inputs.iter().any(|inp| spent.contains(&(inp.txid, inp.vout))) {
                continue;
            }
            // Survivors were mutually admissible before, so this cannot fail.
            let _ = self.admit(tx);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
