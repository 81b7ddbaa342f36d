//! JSON-file-backed chain persistence.
//!
//! One pretty-printed JSON document `{chain, utxo_set}` per node, written
//! through a temp file and an atomic rename so a crash mid-save never
//! leaves a half-written chain. The engine treats the stored UTXO snapshot
//! as advisory and rebuilds from the chain on load.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use karat_core::error::StorageError;
use karat_core::storage::ChainStore;
use karat_core::types::Block;
use karat_core::utxo::UtxoSet;

/// On-disk chain document.
#[derive(Serialize, Deserialize)]
struct ChainFile {
    chain: Vec<Block>,
    utxo_set: UtxoSet,
}

/// [`ChainStore`] writing a single JSON file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ChainStore for JsonFileStore {
    fn save(&self, chain: &[Block], utxo: &UtxoSet) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let document = ChainFile {
            chain: chain.to_vec(),
            utxo_set: utxo.clone(),
        };
        let rendered = serde_json::to_string_pretty(&document)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), blocks = chain.len(), "chain saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<(Vec<Block>, UtxoSet)>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let document: ChainFile =
            serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        Ok(Some((document.chain, document.utxo_set)))
    }
}
