use serde::Deserialize;

use super::{normalize_address, RegistryError, RegistryResult};
use crate::scoring::{NodeState, NodeStatus, NodeType};

const WEI_PER_TOKEN: f64 = 1e18;

/// Node record as the registry stores it: small-integer enums and stake in wei
#[derive(Debug, Clone, Deserialize)]
pub struct RawNodeRecord {
    pub operator: String,
    pub node_type: u8,
    pub status: u8,
    /// Decimal string, wei does not fit in a TOML integer
    pub staked_wei: String,
    pub registered_at: u64,
    #[serde(default)]
    pub jobs_completed: u64,
    #[serde(default)]
    pub jobs_failed: u64,
    #[serde(default)]
    pub total_uptime: u64,
    pub last_heartbeat: u64,
    #[serde(default)]
    pub metadata_uri: String,
    #[serde(default)]
    pub reputation_score: u64,
}

pub fn decode_node_type(raw: u8) -> RegistryResult<NodeType> {
    match raw {
        0 => Ok(NodeType::Gpu),
        1 => Ok(NodeType::Storage),
        other => Err(RegistryError::MalformedInput(format!("unknown node type {}", other))),
    }
}

pub fn decode_status(raw: u8) -> RegistryResult<NodeStatus> {
    match raw {
        0 => Ok(NodeStatus::Inactive),
        1 => Ok(NodeStatus::Active),
        2 => Ok(NodeStatus::Slashed),
        other => Err(RegistryError::MalformedInput(format!("unknown node status {}", other))),
    }
}

/// Wei string to native-token units
pub fn wei_to_tokens(wei: &str) -> RegistryResult<f64> {
    let value: u128 = wei
        .trim()
        .parse()
        .map_err(|e| RegistryError::MalformedInput(format!("bad stake '{}': {}", wei, e)))?;
    Ok(value as f64 / WEI_PER_TOKEN)
}

fn timestamp(field: &str, raw: u64) -> RegistryResult<i64> {
    i64::try_from(raw)
        .map_err(|_| RegistryError::MalformedInput(format!("{} out of range: {}", field, raw)))
}

impl RawNodeRecord {
    pub fn decode(&self) -> RegistryResult<NodeState> {
        Ok(NodeState {
            address: normalize_address(&self.operator),
            node_type: decode_node_type(self.node_type)?,
            status: decode_status(self.status)?,
            staked_amount: wei_to_tokens(&self.staked_wei)?,
            registered_at: timestamp("registered_at", self.registered_at)?,
            last_heartbeat: timestamp("last_heartbeat", self.last_heartbeat)?,
            jobs_completed: self.jobs_completed,
            jobs_failed: self.jobs_failed,
            total_uptime: self.total_uptime,
            reputation_score: self.reputation_score,
        })
    }
}
