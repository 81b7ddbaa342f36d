//! Node configuration.

use std::path::PathBuf;

use karat_core::chain::ChainParams;
use karat_core::constants::{
    DEFAULT_BASE_DIFFICULTY, DEFAULT_DIFFICULTY_INTERVAL, DEFAULT_P2P_PORT, MINING_REWARD,
};
use karat_network::Peer;

/// Configuration for a full node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for the chain file and wallet.
    pub data_dir: PathBuf,
    /// Host for the P2P listener (also the advertised host).
    pub listen_host: String,
    /// Port for the P2P listener; 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Optional initial contact to dial at startup.
    pub bootstrap_peer: Option<Peer>,
    /// Initial PoW difficulty (leading zero hex digits).
    pub base_difficulty: u32,
    /// Blocks per +1 difficulty step.
    pub difficulty_interval: u64,
    /// Coinbase amount.
    pub mining_reward: f64,
    /// Log level filter string (e.g. "info", "karat_node=debug").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("karat");

        Self {
            data_dir,
            listen_host: "127.0.0.1".to_string(),
            listen_port: DEFAULT_P2P_PORT,
            bootstrap_peer: None,
            base_difficulty: DEFAULT_BASE_DIFFICULTY,
            difficulty_interval: DEFAULT_DIFFICULTY_INTERVAL,
            mining_reward: MINING_REWARD,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Path of the JSON chain file.
    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join("blockchain.json")
    }

    /// Path of the miner wallet file.
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.json")
    }

    /// The consensus parameters this node runs with.
    pub fn chain_params(&self) -> ChainParams {
        ChainParams {
            base_difficulty: self.base_difficulty,
            difficulty_interval: self.difficulty_interval,
            mining_reward: self.mining_reward,
        }
    }
}
