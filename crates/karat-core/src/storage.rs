//! Chain persistence interface.
//!
//! The engine persists through this narrow trait and stays agnostic of the
//! on-disk format. Whatever a store returns from [`ChainStore::load`], the
//! engine rebuilds the UTXO set by replaying the chain, so a stale or
//! hand-edited UTXO snapshot can never poison consensus state.

use std::sync::Mutex;

use crate::error::StorageError;
use crate::types::Block;
use crate::utxo::UtxoSet;

/// Save/load hook for the chain and its derived UTXO set.
pub trait ChainStore: Send {
    /// Persist the chain and the current UTXO snapshot. Best-effort: the
    /// engine logs failures and keeps the in-memory state authoritative.
    fn save(&self, chain: &[Block], utxo: &UtxoSet) -> Result<(), StorageError>;

    /// Load a previously saved chain. `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<(Vec<Block>, UtxoSet)>, StorageError>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<(Vec<Block>, UtxoSet)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks in the last save, if any.
    pub fn saved_len(&self) -> Option<usize> {
        self.saved.lock().unwrap().as_ref().map(|(c, _)| c.len())
    }
}

impl ChainStore for MemoryStore {
    fn save(&self, chain: &[Block], utxo: &UtxoSet) -> Result<(), StorageError> {
        *self.saved.lock().unwrap() = Some((chain.to_vec(), utxo.clone()));
        Ok(())
    }

    fn load(&self) -> Result<Option<(Vec<Block>, UtxoSet)>, StorageError> {
        Ok(self.saved.lock().unwrap().clone())
    }
}

/// Lets tests share a [`MemoryStore`] with an engine that owns its store.
impl ChainStore for std::sync::Arc<MemoryStore> {
    fn save(&self, chain: &[Block], utxo: &UtxoSet) -> Result<(), StorageError> {
        self.as_ref().save(chain, utxo)
    }

    fn load(&self) -> Result<Option<(Vec<Block>, UtxoSet)>, StorageError> {
        self.as_ref().load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Hash256, Transaction};

    #[test]
    fn empty_store_loads_none() {
        let store = MemoryStore::new();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_load_round_trip() {
        let store = MemoryStore::new();
        let cb = Transaction::coinbase("miner", 10.2, 1.0);
        let block = Block::new(0, 1.0, vec![cb], Hash256::ZERO);
        let mut utxo = UtxoSet::new();
        utxo.apply(&block).unwrap();

        store.save(&[block.clone()], &utxo).unwrap();
        let (chain, loaded_utxo) = store.load().unwrap().unwrap();
        assert_eq!(chain, vec![block]);
        assert_eq!(loaded_utxo, utxo);
    }
}
