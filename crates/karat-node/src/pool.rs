//! Cooperative mining pool with share accounting.
//!
//! Members submit "light" shares — a nonce and a hash claimed to meet the
//! pool's low share difficulty. Verified shares increment the member's
//! count. When the pool mines a block, the reward is split proportionally
//! to share counts and the counts reset. Share verification is accounting
//! only; it never touches chain validity. Payouts are ledger credits held
//! by the pool, not on-chain transactions.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use karat_core::difficulty;
use karat_core::types::Hash256;

/// Default share difficulty: easy enough for browser and CPU workers.
pub const DEFAULT_SHARE_DIFFICULTY: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("share hash is not valid hex: {0}")]
    MalformedHash(String),
    #[error("share does not meet pool difficulty {0}")]
    WeakShare(u32),
    #[error("unknown member: {0}")]
    UnknownMember(String),
}

/// Per-member accounting state.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolMember {
    /// Shares accepted since the last payout.
    pub shares: u64,
    /// Unix seconds of the last accepted share or join.
    pub last_active: f64,
    /// Total reward credited across payouts.
    pub credited: f64,
}

/// Aggregate pool statistics for the status API.
#[derive(Clone, Debug, Serialize)]
pub struct PoolStats {
    pub member_count: usize,
    pub total_shares: u64,
    pub share_difficulty: u32,
}

/// The share ledger. Its lock is disjoint from the engine lock and is
/// never held across an engine operation.
pub struct MiningPool {
    members: Mutex<HashMap<String, PoolMember>>,
    share_difficulty: u32,
}

impl MiningPool {
    pub fn new(share_difficulty: u32) -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            share_difficulty,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SHARE_DIFFICULTY)
    }

    /// Register a member (idempotent).
    pub fn join(&self, address: &str) {
        let mut members = self.members.lock();
        members.entry(address.to_string()).or_insert(PoolMember {
            shares: 0,
            last_active: now_secs(),
            credited: 0.0,
        });
    }

    /// Remove a member. Outstanding shares are forfeited; credited rewards
    /// are returned for the caller to surface.
    pub fn leave(&self, address: &str) -> Result<f64, PoolError> {
        self.members
            .lock()
            .remove(address)
            .map(|m| m.credited)
            .ok_or_else(|| PoolError::UnknownMember(address.to_string()))
    }

    /// Accept a share: the claimed hash must parse and meet the pool's
    /// share difficulty. Unknown submitters are registered on the fly.
    pub fn submit_share(
        &self,
        address: &str,
        nonce: u64,
        hash_hex: &str,
    ) -> Result<u64, PoolError> {
        let hash = Hash256::from_hex(hash_hex)
            .map_err(|_| PoolError::MalformedHash(hash_hex.to_string()))?;
        if !difficulty::meets_difficulty(&hash, self.share_difficulty) {
            return Err(PoolError::WeakShare(self.share_difficulty));
        }

        let mut members = self.members.lock();
        let member = members.entry(address.to_string()).or_default();
        member.shares += 1;
        member.last_active = now_secs();
        debug!(address, nonce, shares = member.shares, "share accepted");
        Ok(member.shares)
    }

    /// Split `reward` proportionally to share counts and reset all counts.
    ///
    /// Returns the per-member payouts. Members without shares get nothing
    /// but stay registered. An all-idle pool distributes nothing.
    pub fn distribute(&self, reward: f64) -> Vec<(String, f64)> {
        let mut members = self.members.lock();
        let total: u64 = members.values().map(|m| m.shares).sum();
        if total == 0 {
            return Vec::new();
        }

        let mut payouts = Vec::new();
        for (address, member) in members.iter_mut() {
            if member.shares == 0 {
                continue;
            }
            let payout = reward * member.shares as f64 / total as f64;
            member.credited += payout;
            member.shares = 0;
            payouts.push((address.clone(), payout));
        }
        payouts.sort_by(|a, b| a.0.cmp(&b.0));
        info!(total_shares = total, payouts = payouts.len(), "pool reward distributed");
        payouts
    }

    /// Credited balance of a member.
    pub fn credit(&self, address: &str) -> Option<f64> {
        self.members.lock().get(address).map(|m| m.credited)
    }

    pub fn member(&self, address: &str) -> Option<PoolMember> {
        self.members.lock().get(address).cloned()
    }

    pub fn stats(&self) -> PoolStats {
        let members = self.members.lock();
        PoolStats {
            member_count: members.len(),
            total_shares: members.values().map(|m| m.shares).sum(),
            share_difficulty: self.share_difficulty,
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

    /// A hex hash with `zeros` leading zero digits.
    fn share_hash(zeros: usize) -> String {
        format!("{}{}", "0".repeat(zeros), "f".repeat(64 - zeros))
    }

    #[test]
    fn valid_share_increments_count() {
        let pool = MiningPool::new(2);
        assert_eq!(pool.submit_share("alice", 7, &share_hash(2)).unwrap(), 1);
        assert_eq!(pool.submit_share("alice", 8, &share_hash(3)).unwrap(), 2);
    }

    #[test]
    fn weak_share_rejected() {
        let pool = MiningPool::new(3);
        assert_eq!(
            pool.submit_share("alice", 1, &share_hash(2)),
            Err(PoolError::WeakShare(3))
        );
    }

    #[test]
    fn malformed_hash_rejected() {
        let pool = MiningPool::new(1);
        assert!(matches!(
            pool.submit_share("alice", 1, "zzzz"),
            Err(PoolError::MalformedHash(_))
        ));
    }

    #[test]
    fn distribution_is_proportional_and_resets() {
        let pool = MiningPool::new(1);
        for _ in 0..3 {
            pool.submit_share("alice", 0, &share_hash(1)).unwrap();
        }
        pool.submit_share("bob", 0, &share_hash(1)).unwrap();

        let payouts = pool.distribute(10.2);
        assert_eq!(payouts.len(), 2);
        let alice = payouts.iter().find(|(a, _)| a == "alice").unwrap().1;
        let bob = payouts.iter().find(|(a, _)| a == "bob").unwrap().1;
        assert!((alice - 10.2 * 0.75).abs() < EPS);
        assert!((bob - 10.2 * 0.25).abs() < EPS);
        // Normalization: payouts sum to the full reward.
        assert!((alice + bob - 10.2).abs() < EPS);

        // Shares reset; a second distribution pays nothing.
        assert!(pool.distribute(10.2).is_empty());
        assert_eq!(pool.stats().total_shares, 0);
    }

    #[test]
    fn credit_accumulates_across_rounds() {
        let pool = MiningPool::new(1);
        pool.submit_share("alice", 0, &share_hash(1)).unwrap();
        pool.distribute(10.0);
        pool.submit_share("alice", 0, &share_hash(1)).unwrap();
        pool.distribute(10.0);
        assert!((pool.credit("alice").unwrap() - 20.0).abs() < EPS);
    }

    #[test]
    fn join_is_idempotent_and_leave_returns_credit() {
        let pool = MiningPool::new(1);
        pool.join("alice");
        pool.join("alice");
        assert_eq!(pool.stats().member_count, 1);

        pool.submit_share("alice", 0, &share_hash(1)).unwrap();
        pool.distribute(4.0);
        let credited = pool.leave("alice").unwrap();
        assert!((credited - 4.0).abs() < EPS);
        assert_eq!(pool.leave("alice"), Err(PoolError::UnknownMember("alice".into())));
    }

    #[test]
    fn idle_members_excluded_from_payout() {
        let pool = MiningPool::new(1);
        pool.join("idle");
        pool.submit_share("worker", 0, &share_hash(1)).unwrap();
        let payouts = pool.distribute(5.0);
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].0, "worker");
    }
}
