//! Demo identities
//!
//! Without a registry the facade still answers score queries. Node
//! state is synthesized from a hash of the address, so the same address
//! always yields the same profile (heartbeat and registration are
//! relative to `now`).

use sha2::{Digest, Sha256};

use super::normalize_address;
use crate::scoring::{NodeState, NodeStatus, NodeType};

/// Address used for the fixed demo critical node
pub const DEMO_CRITICAL_ADDRESS: &str = "0xaa3f1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a";

fn seed(address: &str) -> u64 {
    let digest = Sha256::digest(normalize_address(address).as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64
}

pub fn demo_node(address: &str, now: i64) -> NodeState {
    let s = seed(address);
    NodeState {
        address: normalize_address(address),
        node_type: NodeType::Gpu,
        status: NodeStatus::Active,
        staked_amount: 0.05 + (s % 10) as f64 * 0.01,
        registered_at: now - 30 * 86_400,
        last_heartbeat: now - (s % 600) as i64,
        jobs_completed: (s % 50) + 5,
        jobs_failed: s % 5,
        total_uptime: (s % 100) * 3600,
        reputation_score: 75,
    }
}

/// A demo node that is guaranteed to score critical
pub fn demo_critical_node(now: i64) -> NodeState {
    let mut node = demo_node(DEMO_CRITICAL_ADDRESS, now);
    node.jobs_failed = 8;
    node.last_heartbeat = now - 25_000;
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::HealthScorer;

    const NOW: i64 = 1_750_000_000;

    #[test]
    fn test_same_address_same_identity() {
        assert_eq!(demo_node("0xdead", NOW), demo_node("0xDEAD", NOW));
        assert_eq!(demo_node("0xdead", NOW).address, "0xdead");
    }

    #[test]
    fn test_fields_within_generator_ranges() {
        for i in 0..50 {
            let n = demo_node(&format!("0x{:040x}", i), NOW);
            assert!(n.staked_amount >= 0.05 && n.staked_amount < 0.15);
            assert!((5..55).contains(&n.jobs_completed));
            assert!(n.jobs_failed < 5);
            assert!(NOW - n.last_heartbeat < 600);
            assert_eq!(n.status, NodeStatus::Active);
        }
    }

    #[test]
    fn test_demo_critical_node_is_critical() {
        let r = HealthScorer::default().predict_at(&demo_critical_node(NOW), NOW);
        assert!(r.is_critical(), "score {}", r.predicted_score);
        assert_eq!(r.address, DEMO_CRITICAL_ADDRESS);
    }
}
