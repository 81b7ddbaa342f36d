//! Shared test helpers for E2E and multi-node tests.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use karat_core::chain::{Blockchain, ChainParams};
use karat_core::types::Transaction;
use karat_node::NodeConfig;
use karat_wallet::{Wallet, build_transfer};

/// Tolerance for f64 amount comparisons.
pub const EPS: f64 = 1e-9;

/// Difficulty-1 consensus parameters, for fast PoW in tests.
pub fn fast_params() -> ChainParams {
    ChainParams {
        base_difficulty: 1,
        difficulty_interval: 10,
        ..ChainParams::default()
    }
}

/// A fresh difficulty-1 engine with no persistence.
pub fn test_engine() -> Blockchain {
    Blockchain::new(fast_params())
}

/// Node config bound to a temp data dir, ephemeral port, difficulty 1.
pub fn fast_config(data_dir: &Path) -> NodeConfig {
    NodeConfig {
        data_dir: data_dir.to_path_buf(),
        listen_port: 0,
        base_difficulty: 1,
        ..NodeConfig::default()
    }
}

/// A wallet funded by mining one block to its address.
pub fn funded_wallet(engine: &mut Blockchain) -> Wallet {
    let wallet = Wallet::generate();
    engine.mine(wallet.address().as_str()).unwrap();
    wallet
}

/// Build a signed transfer against the engine's current UTXO set.
pub fn transfer(
    engine: &Blockchain,
    wallet: &Wallet,
    to: &str,
    amount: f64,
) -> Transaction {
    build_transfer(engine.utxo(), wallet, to, amount, now_secs()).unwrap()
}

pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
