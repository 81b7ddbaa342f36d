//! Unspent transaction output index.
//!
//! Maps txid to that transaction's output list; a `None` element is the
//! spent sentinel and is never revived. Keys live in a `BTreeMap` so that
//! coin selection iterates in a stable (txid lexicographic, vout ascending)
//! order.
//!
//! The index is derived state: it can always be rebuilt by replaying the
//! chain, and is, on every load from disk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TransactionError;
use crate::types::{Block, Hash256, Transaction, TxOutput};

/// Reference to one output: (txid, vout).
pub type OutPoint = (Hash256, usize);

/// Result of greedy coin selection.
#[derive(Clone, Debug, PartialEq)]
pub struct CoinSelection {
    /// Total amount accumulated over the chosen outputs.
    pub accumulated: f64,
    /// The chosen outputs, in selection order.
    pub outpoints: Vec<OutPoint>,
}

impl CoinSelection {
    /// Whether the selection covers `amount`.
    pub fn covers(&self, amount: f64) -> bool {
        self.accumulated >= amount
    }
}

/// The unspent-output set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UtxoSet {
    outputs: BTreeMap<Hash256, Vec<Option<TxOutput>>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a block's transactions: mark each input's referenced output
    /// spent, then insert each transaction's outputs under its txid.
    ///
    /// Atomic per block — on any bad reference nothing is mutated. Within
    /// the block, transactions apply in order, so a transaction may spend an
    /// output created earlier in the same block.
    pub fn apply(&mut self, block: &Block) -> Result<(), TransactionError> {
        let mut staged = self.clone();
        for tx in &block.transactions {
            staged.apply_tx(tx)?;
        }
        *self = staged;
        Ok(())
    }

    pub(crate) fn apply_tx(&mut self, tx: &Transaction) -> Result<(), TransactionError> {
        for inp in &tx.inputs {
            let outputs = self
                .outputs
                .get_mut(&inp.txid)
                .ok_or_else(|| TransactionError::UnknownUtxo(format!("{}:{}", inp.txid, inp.vout)))?;
            let slot = outputs
                .get_mut(inp.vout)
                .ok_or_else(|| TransactionError::UnknownUtxo(format!("{}:{}", inp.txid, inp.vout)))?;
            if slot.is_none() {
                return Err(TransactionError::AlreadySpent(format!(
                    "{}:{}",
                    inp.txid, inp.vout
                )));
            }
            *slot = None;
        }
        self.outputs
            .insert(tx.txid, tx.outputs.iter().cloned().map(Some).collect());
        Ok(())
    }

    /// Look up a live output. `None` if unknown or spent.
    pub fn output(&self, txid: &Hash256, vout: usize) -> Option<&TxOutput> {
        self.outputs.get(txid)?.get(vout)?.as_ref()
    }

    /// Sum of all live output amounts paying `address`.
    pub fn balance(&self, address: &str) -> f64 {
        self.live_outputs()
            .filter(|(_, out)| out.address == address)
            .map(|(_, out)| out.amount)
            .sum()
    }

    /// Greedy coin selection for `address`: accumulate live outputs in
    /// (txid, vout) order until `amount` is covered.
    ///
    /// When the address cannot cover `amount`, the returned selection holds
    /// everything found; `covers` reports the shortfall.
    pub fn select(&self, address: &str, amount: f64) -> CoinSelection {
        let mut selection = CoinSelection {
            accumulated: 0.0,
            outpoints: Vec::new(),
        };
        for (outpoint, out) in self.live_outputs() {
            if out.address != address {
                continue;
            }
            selection.accumulated += out.amount;
            selection.outpoints.push(outpoint);
            if selection.covers(amount) {
                break;
            }
        }
        selection
    }

    /// Rebuild the set from scratch by replaying a chain in index order.
    pub fn rebuild(chain: &[Block]) -> Result<Self, TransactionError> {
        let mut set = Self::new();
        for block in chain {
            set.apply(block)?;
        }
        Ok(set)
    }

    /// All live outputs in stable (txid, vout) order.
    pub fn live_outputs(&self) -> impl Iterator<Item = (OutPoint, &TxOutput)> {
        self.outputs.iter().flat_map(|(txid, outs)| {
            outs.iter()
                .enumerate()
                .filter_map(move |(vout, slot)| slot.as_ref().map(|out| ((*txid, vout), out)))
        })
    }

    /// Number of live outputs.
    pub fn live_count(&self) -> usize {
        self.live_outputs().count()
    }

    /// Total value of all live outputs.
    pub fn total_value(&self) -> f64 {
        self.live_outputs().map(|(_, out)| out.amount).sum()
    }
}
