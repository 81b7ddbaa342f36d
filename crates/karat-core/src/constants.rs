//! Protocol constants. Monetary amounts are KARAT as f64 (the wire and
//! storage formats are JSON numbers).

/// Coinbase reward paid to the miner of each block.
pub const MINING_REWARD: f64 = 10.2;

/// Initial proof-of-work difficulty (leading zero hex digits of the block hash).
pub const DEFAULT_BASE_DIFFICULTY: u32 = 5;

/// Blocks per +1 difficulty step.
pub const DEFAULT_DIFFICULTY_INTERVAL: u64 = 10;

/// Maximum allowed clock drift into the future for a block timestamp (2 hours).
pub const MAX_FUTURE_DRIFT_SECS: f64 = 7200.0;

/// Number of preceding blocks considered for the median-time-past rule.
pub const MEDIAN_TIME_WINDOW: usize = 11;

/// Output address of the genesis coinbase. Not a spendable Base58Check
/// address; the genesis output carries a zero amount.
pub const GENESIS_ADDRESS: &str = "genesis";

pub const DEFAULT_P2P_PORT: u16 = 16183;

/// Hard cap on a single wire frame (length prefix + JSON payload).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Base58Check version byte for Karat addresses (same as Bitcoin P2PKH).
pub const ADDRESS_VERSION: u8 = 0x00;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_drift_is_two_hours() {
        assert_eq!(MAX_FUTURE_DRIFT_SECS, 2.0 * 3600.0);
    }

    #[test]
    fn base_difficulty_nonzero() {
        assert!(DEFAULT_BASE_DIFFICULTY >= 1);
    }
}
