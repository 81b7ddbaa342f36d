//! Karat full node binary.
//!
//! Starts the P2P node with JSON-file storage and an interactive command
//! loop for mining, transfers, and status queries.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use karat_network::Peer;
use karat_node::{Node, NodeConfig};
use karat_wallet::Wallet;

/// Karat full node.
#[derive(Parser, Debug)]
#[command(
    name = "karat-node",
    version,
    about = "Karat full node with P2P gossip and an interactive miner CLI"
)]
struct Args {
    /// Data directory for the chain file and wallet
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// P2P listen host (also the advertised host)
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// P2P listen port
    #[arg(long, default_value_t = karat_core::constants::DEFAULT_P2P_PORT)]
    port: u16,

    /// Bootstrap peer as host:port
    #[arg(long)]
    peer: Option<String>,

    /// Initial PoW difficulty (leading zero hex digits)
    #[arg(long, default_value_t = karat_core::constants::DEFAULT_BASE_DIFFICULTY)]
    base_difficulty: u32,

    /// Blocks per +1 difficulty step
    #[arg(long, default_value_t = karat_core::constants::DEFAULT_DIFFICULTY_INTERVAL)]
    difficulty_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Disable P2P networking (single-node mode)
    #[arg(long)]
    no_network: bool,
}

impl Args {
    fn into_config(self) -> Result<(NodeConfig, String, bool)> {
        let bootstrap_peer = self
            .peer
            .as_deref()
            .map(|s| s.parse::<Peer>().map_err(anyhow::Error::msg))
            .transpose()
            .context("invalid --peer")?;

        let defaults = NodeConfig::default();
        let config = NodeConfig {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            listen_host: self.host,
            listen_port: self.port,
            bootstrap_peer,
            base_difficulty: self.base_difficulty,
            difficulty_interval: self.difficulty_interval,
            log_level: self.log_level,
            ..defaults
        };
        Ok((config, self.log_format, self.no_network))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, log_format, no_network) = match args.into_config() {
        Ok(parts) => parts,
        Err(e) => {
            eprintln!("{e:#}");
            process::exit(1);
        }
    };

    init_logging(&config.log_level, &log_format);

    info!("Karat node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!("failed to create data_dir: {e}");
        process::exit(1);
    }

    let wallet_path = config.wallet_path();
    let wallet = match Wallet::load_or_generate(&wallet_path) {
        Ok(w) => w,
        Err(e) => {
            error!("failed to open wallet: {e}");
            process::exit(1);
        }
    };
    info!("miner wallet: {}", wallet.address());

    let node = if no_network {
        Node::without_network(config)
    } else {
        match Node::start(config).await {
            Ok(n) => n,
            Err(e) => {
                error!("failed to start node: {e}");
                process::exit(1);
            }
        }
    };

    if let Some(listen) = node.listen_peer() {
        info!("p2p listening on {listen}");
    }

    if let Err(e) = run_cli(node.clone(), wallet).await {
        error!("cli error: {e}");
    }
    node.shutdown();
    info!("Karat node shutdown complete");
}

/// Interactive command loop on stdin.
async fn run_cli(node: Arc<Node>, wallet: Wallet) -> Result<()> {
    println!("Commands:");
    println!("  mine                  Mine a new block to this wallet");
    println!("  balance               Check wallet balance");
    println!("  send <addr> <amount>  Transfer KAR to an address");
    println!("  status                Show node status");
    println!("  peers                 List known peers");
    println!("  chain                 Display the blockchain");
    println!("  quit                  Exit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("mine") => match node.mine(wallet.address().as_str()).await {
                Ok(block) => {
                    println!("mined block #{} {}", block.index, block.hash);
                    println!("balance: {} KAR", node.balance(wallet.address().as_str()));
                }
                Err(e) => println!("mining failed: {e}"),
            },
            Some("balance") => {
                println!("balance: {} KAR", node.balance(wallet.address().as_str()));
            }
            Some("send") => {
                let (Some(to), Some(amount)) = (parts.next(), parts.next()) else {
                    println!("usage: send <addr> <amount>");
                    continue;
                };
                let Ok(amount) = amount.parse::<f64>() else {
                    println!("bad amount: {amount}");
                    continue;
                };
                match node.send(&wallet, to, amount) {
                    Ok(txid) => println!("submitted {txid}"),
                    Err(e) => println!("send failed: {e}"),
                }
            }
            Some("status") => println!("{}", node.status_line()),
            Some("peers") => {
                let peers = node.known_peers();
                if peers.is_empty() {
                    println!("no known peers");
                } else {
                    for peer in peers {
                        println!("{peer}");
                    }
                }
            }
            Some("chain") => print!("{}", node.chain_summary()),
            Some("quit") | Some("exit") => break,
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
    }
    Ok(())
}

/// Initialize tracing with the given level and output format.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
