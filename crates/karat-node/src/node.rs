//! Full node composition and the collaborator-facing API.
//!
//! [`Node`] owns the engine (behind the single engine mutex), the network
//! handle, and the mining pool. The HTTP façade and CLI drive the node
//! exclusively through these methods; every one of them takes the relevant
//! lock internally, so callers carry no lock discipline.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use karat_core::chain::{Blockchain, Candidate};
use karat_core::error::{ChainError, NetworkError};
use karat_core::types::{Block, Hash256, Transaction};
use karat_network::{NetworkConfig, NetworkNode};
use karat_wallet::{Wallet, WalletError, build_transfer};

use crate::config::NodeConfig;
use crate::pool::MiningPool;
use crate::storage::JsonFileStore;

/// The engine handle shared with the network layer.
pub type SharedEngine = Arc<Mutex<Blockchain>>;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Where the miner currently is in its state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MinerStatus {
    Idle,
    Building,
    Solving,
}

/// Network-wide stats for the status API.
#[derive(Clone, Debug, Serialize)]
pub struct NetworkStats {
    pub height: usize,
    pub difficulty: u32,
    pub pending_transactions: usize,
    pub peer_count: usize,
    pub mining_reward: f64,
}

/// A running Karat node.
pub struct Node {
    engine: SharedEngine,
    network: Option<NetworkNode>,
    pool: MiningPool,
    miner_status: Mutex<MinerStatus>,
}

impl Node {
    /// Start a full node: storage-backed engine plus the P2P listener.
    /// Dials the bootstrap peer if the config names one.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let engine = Self::build_engine(&config);
        let network_config = NetworkConfig {
            listen_host: config.listen_host.clone(),
            listen_port: config.listen_port,
            bootstrap_peer: config.bootstrap_peer.clone(),
        };
        let network = NetworkNode::start(network_config, Arc::clone(&engine)).await?;
        info!(listen = %network.listen_peer(), "node started");
        Ok(Arc::new(Self {
            engine,
            network: Some(network),
            pool: MiningPool::with_defaults(),
            miner_status: Mutex::new(MinerStatus::Idle),
        }))
    }

    /// Start a node without networking (single-node mode and tests).
    pub fn without_network(config: NodeConfig) -> Arc<Self> {
        Arc::new(Self {
            engine: Self::build_engine(&config),
            network: None,
            pool: MiningPool::with_defaults(),
            miner_status: Mutex::new(MinerStatus::Idle),
        })
    }

    fn build_engine(config: &NodeConfig) -> SharedEngine {
        let store = JsonFileStore::new(config.chain_path());
        Arc::new(Mutex::new(Blockchain::with_store(
            config.chain_params(),
            Box::new(store),
        )))
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn pool(&self) -> &MiningPool {
        &self.pool
    }

    // --- Mining ---

    /// Mine one block to `reward_address`.
    ///
    /// Builds the candidate under the engine lock, solves PoW on a blocking
    /// worker with the lock released, then commits and floods the block.
    /// Returns [`ChainError::MiningCancelled`] if [`Node::cancel_mining`]
    /// fired, and [`ChainError::DoesNotExtendTip`] if a peer block won the
    /// race during the solve.
    pub async fn mine(&self, reward_address: &str) -> Result<Block, NodeError> {
        *self.miner_status.lock() = MinerStatus::Building;
        let (candidate, cancel) = {
            let engine = self.engine.lock();
            (engine.build_candidate(reward_address), engine.cancel_handle())
        };

        *self.miner_status.lock() = MinerStatus::Solving;
        let solved = tokio::task::spawn_blocking(move || {
            let Candidate { mut block, target } = candidate;
            block.mine(target, &cancel).then_some(block)
        })
        .await
        .expect("miner worker panicked");
        *self.miner_status.lock() = MinerStatus::Idle;

        let Some(block) = solved else {
            return Err(ChainError::MiningCancelled.into());
        };
        self.engine.lock().commit_mined(block.clone())?;
        if let Some(network) = &self.network {
            network.broadcast_block(&block);
        }
        Ok(block)
    }

    /// Mine one block to the pool operator's address and split the reward
    /// across members by share count. Returns the block and the payouts.
    pub async fn mine_to_pool(
        &self,
        pool_address: &str,
    ) -> Result<(Block, Vec<(String, f64)>), NodeError> {
        let block = self.mine(pool_address).await?;
        let reward = self.engine.lock().params().mining_reward;
        let payouts = self.pool.distribute(reward);
        Ok((block, payouts))
    }

    /// Request cancellation of an in-flight PoW search.
    pub fn cancel_mining(&self) {
        self.engine.lock().cancel_mining();
    }

    pub fn miner_status(&self) -> MinerStatus {
        *self.miner_status.lock()
    }

    // --- Transactions ---

    /// Verify and admit a transaction, then flood it to peers.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, NodeError> {
        let txid = tx.txid;
        self.engine.lock().submit_transaction(tx.clone())?;
        if let Some(network) = &self.network {
            network.broadcast_transaction(&tx);
        }
        Ok(txid)
    }

    /// Build and sign a transfer from `wallet` without submitting it.
    pub fn create_transaction(
        &self,
        wallet: &Wallet,
        to: &str,
        amount: f64,
    ) -> Result<Transaction, NodeError> {
        let engine = self.engine.lock();
        Ok(build_transfer(engine.utxo(), wallet, to, amount, now_secs())?)
    }

    /// Build, sign, submit, and flood a transfer. Returns the txid.
    pub fn send(&self, wallet: &Wallet, to: &str, amount: f64) -> Result<Hash256, NodeError> {
        let tx = self.create_transaction(wallet, to, amount)?;
        self.submit_transaction(tx)
    }

    // --- Read API for the HTTP façade and CLI ---

    pub fn chain_length(&self) -> usize {
        self.engine.lock().chain_len()
    }

    pub fn block_by_index(&self, index: u64) -> Option<Block> {
        self.engine.lock().block_by_index(index).cloned()
    }

    pub fn latest_blocks(&self, n: usize) -> Vec<Block> {
        self.engine.lock().latest_blocks(n).to_vec()
    }

    pub fn balance(&self, address: &str) -> f64 {
        self.engine.lock().balance(address)
    }

    pub fn network_stats(&self) -> NetworkStats {
        let (height, difficulty, pending, reward) = {
            let engine = self.engine.lock();
            (
                engine.chain_len(),
                engine.difficulty(),
                engine.pending_count(),
                engine.params().mining_reward,
            )
        };
        NetworkStats {
            height,
            difficulty,
            pending_transactions: pending,
            peer_count: self.peer_count(),
            mining_reward: reward,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.network.as_ref().map_or(0, |n| n.peer_count())
    }

    pub fn known_peers(&self) -> Vec<karat_network::Peer> {
        self.network
            .as_ref()
            .map_or_else(Vec::new, |n| n.known_peers())
    }

    /// The advertised listen address, when networking is up.
    pub fn listen_peer(&self) -> Option<karat_network::Peer> {
        self.network.as_ref().map(|n| n.listen_peer())
    }

    pub fn connect_peer(&self, peer: karat_network::Peer) {
        if let Some(network) = &self.network {
            network.connect_peer(peer);
        } else {
            warn!("connect_peer ignored: networking disabled");
        }
    }

    /// One-line status for the CLI.
    pub fn status_line(&self) -> String {
        let stats = self.network_stats();
        format!(
            "height={} difficulty={} pending={} peers={} reward={}",
            stats.height,
            stats.difficulty,
            stats.pending_transactions,
            stats.peer_count,
            stats.mining_reward
        )
    }

    /// Per-block chain summary for the CLI.
    pub fn chain_summary(&self) -> String {
        self.engine.lock().chain_summary()
    }

    pub fn shutdown(&self) {
        if let Some(network) = &self.network {
            network.shutdown();
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn test_node() -> (Arc<Node>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            base_difficulty: 1,
            ..NodeConfig::default()
        };
        (Node::without_network(config), dir)
    }

    #[tokio::test]
    async fn mine_updates_balance_and_status() {
        let (node, _dir) = test_node();
        assert_eq!(node.miner_status(), MinerStatus::Idle);
        let wallet = Wallet::generate();
        node.mine(wallet.address().as_str()).await.unwrap();
        assert_eq!(node.chain_length(), 2);
        assert!((node.balance(wallet.address().as_str()) - 10.2).abs() < EPS);
        assert_eq!(node.miner_status(), MinerStatus::Idle);
    }

    #[tokio::test]
    async fn send_then_mine_settles_balances() {
        let (node, _dir) = test_node();
        let alice = Wallet::generate();
        let bob = Wallet::generate();
        node.mine(alice.address().as_str()).await.unwrap();

        node.send(&alice, bob.address().as_str(), 3.0).unwrap();
        assert_eq!(node.network_stats().pending_transactions, 1);

        node.mine(alice.address().as_str()).await.unwrap();
        assert!((node.balance(alice.address().as_str()) - 17.4).abs() < EPS);
        assert!((node.balance(bob.address().as_str()) - 3.0).abs() < EPS);
    }

    #[tokio::test]
    async fn insufficient_funds_surfaces_to_caller() {
        let (node, _dir) = test_node();
        let broke = Wallet::generate();
        let err = node.send(&broke, "anywhere", 1.0).unwrap_err();
        assert!(matches!(
            err,
            NodeError::Wallet(WalletError::InsufficientFunds { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_mining_leaves_pool_intact() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            // Unreachable difficulty: only cancellation ends the solve.
            base_difficulty: 64,
            ..NodeConfig::default()
        };
        let node = Node::without_network(config);

        let miner = Arc::clone(&node);
        let task = tokio::spawn(async move { miner.mine("nobody").await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        node.cancel_mining();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(NodeError::Chain(ChainError::MiningCancelled))
        ));
        assert_eq!(node.chain_length(), 1);
    }

    #[tokio::test]
    async fn pool_mining_distributes_reward() {
        let (node, _dir) = test_node();
        let zeros = "0".repeat(2) + &"f".repeat(62);
        node.pool().submit_share("alice", 1, &zeros).unwrap();
        node.pool().submit_share("bob", 2, &zeros).unwrap();

        let (_block, payouts) = node.mine_to_pool("pool-operator").await.unwrap();
        assert_eq!(payouts.len(), 2);
        let total: f64 = payouts.iter().map(|(_, amount)| amount).sum();
        assert!((total - 10.2).abs() < EPS);
        // The operator address holds the on-chain reward; payouts are
        // pool-ledger credits.
        assert!((node.balance("pool-operator") - 10.2).abs() < EPS);
    }

    #[tokio::test]
    async fn stats_reflect_engine_state() {
        let (node, _dir) = test_node();
        let stats = node.network_stats();
        assert_eq!(stats.height, 1);
        assert_eq!(stats.peer_count, 0);
        assert_eq!(stats.difficulty, 1);
        assert!((stats.mining_reward - 10.2).abs() < EPS);
        assert!(node.status_line().contains("height=1"));
    }

    #[test]
    fn read_api_exposes_blocks() {
        let (node, _dir) = test_node();
        assert_eq!(node.block_by_index(0).unwrap().index, 0);
        assert!(node.block_by_index(7).is_none());
        assert_eq!(node.latest_blocks(5).len(), 1);
        assert_eq!(node.chain_length(), 1);
    }
}
