//! Registry gateway
//!
//! The keeper and the web facade only ever talk to the node registry
//! through [`RegistryGateway`]. Adapters decide how the registry is
//! reached; they are also responsible for handing out fully decoded
//! [`NodeState`] values and for enforcing I/O deadlines.

pub mod decode;
pub mod demo;
pub mod simulated;
pub mod timeout;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::scoring::NodeState;

/// Errors surfaced by registry adapters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Address unknown to the registry
    #[error("Node not found: {address}")]
    NotFound { address: String },

    /// Network/RPC failure while reading
    #[error("Registry read failed: {0}")]
    TransientRead(String),

    /// Network/gas/nonce failure while writing
    #[error("Registry write failed: {0}")]
    TransientWrite(String),

    /// Registry data outside the documented domains
    #[error("Malformed registry data: {0}")]
    MalformedInput(String),
}

impl RegistryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RegistryError::TransientRead(_) | RegistryError::TransientWrite(_))
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// What happened to a write request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Submitted,
    /// No write credentials configured (read-only mode)
    Skipped,
}

#[async_trait]
pub trait RegistryGateway: Send + Sync {
    /// Adapter name for logs
    fn name(&self) -> &str;

    /// Whether write credentials are configured
    fn can_write(&self) -> bool;

    /// Addresses currently ACTIVE, in registry order
    async fn list_active_nodes(&self) -> RegistryResult<Vec<String>>;

    async fn read_node(&self, address: &str) -> RegistryResult<NodeState>;

    /// Single all-or-nothing write of (address, score) pairs
    async fn submit_batch_scores(
        &self,
        addresses: &[String],
        scores: &[u8],
    ) -> RegistryResult<WriteOutcome>;

    async fn signal_reassignment(
        &self,
        address: &str,
        affected_jobs: u64,
    ) -> RegistryResult<WriteOutcome>;

    /// Recent accepted writes, for adapters that keep a journal
    fn recent_writes(&self, _limit: usize) -> Vec<serde_json::Value> {
        Vec::new()
    }

    fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "adapter": self.name(),
            "write_enabled": self.can_write(),
        })
    }
}

/// Canonical form of a node address (lowercase hex, trimmed)
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("  0xAbCDef12 "), "0xabcdef12");
    }

    #[test]
    fn test_transient_classification() {
        assert!(RegistryError::TransientRead("rpc".into()).is_transient());
        assert!(RegistryError::TransientWrite("nonce".into()).is_transient());
        assert!(!RegistryError::NotFound { address: "0x1".into() }.is_transient());
        assert!(!RegistryError::MalformedInput("status 7".into()).is_transient());
    }
}
