use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::decode::{decode_status, RawNodeRecord};
use super::{normalize_address, RegistryError, RegistryGateway, RegistryResult, WriteOutcome};
use crate::scoring::{NodeState, NodeStatus};

/// Write credential. Never printed.
#[derive(Clone)]
pub struct WriterCredentials {
    key: String,
}

impl WriterCredentials {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Account identifier derived from the key, safe to log
    pub fn account(&self) -> String {
        let digest = Sha256::digest(self.key.as_bytes());
        format!("0x{}", hex::encode(&digest[..20]))
    }
}

impl std::fmt::Debug for WriterCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterCredentials")
            .field("account", &self.account())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct NodeFile {
    #[serde(default)]
    nodes: Vec<RawNodeRecord>,
}

/// One accepted registry write
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteEntry {
    BatchScores {
        timestamp: String,
        account: String,
        scores: Vec<(String, u8)>,
    },
    Reassignment {
        timestamp: String,
        account: String,
        address: String,
        affected_jobs: u64,
    },
}

/// In-process registry
///
/// Holds raw records exactly as the on-chain registry would return them,
/// so every read goes through the same decoding as a real adapter.
/// Accepted writes land in a rotating journal.
pub struct SimulatedRegistry {
    nodes: DashMap<String, RawNodeRecord>,
    /// Registration order, which is also list order
    order: RwLock<Vec<String>>,
    writer: Option<WriterCredentials>,
    journal: RwLock<Vec<WriteEntry>>,
    journal_max: usize,
    total_writes: AtomicU64,
}

impl SimulatedRegistry {
    pub fn new(
        records: Vec<RawNodeRecord>,
        writer: Option<WriterCredentials>,
        journal_max: usize,
    ) -> Self {
        let registry = Self {
            nodes: DashMap::new(),
            order: RwLock::new(Vec::new()),
            writer,
            journal: RwLock::new(Vec::new()),
            journal_max,
            total_writes: AtomicU64::new(0),
        };
        for record in records {
            registry.upsert(record);
        }
        registry
    }

    pub fn from_file(
        path: &str,
        writer: Option<WriterCredentials>,
        journal_max: usize,
    ) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read node file '{}': {}", path, e))?;
        let file: NodeFile = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse node file '{}': {}", path, e))?;
        info!("Loaded {} registry records from {}", file.nodes.len(), path);
        Ok(Self::new(file.nodes, writer, journal_max))
    }

    /// Register a node, or replace its record if already known
    pub fn upsert(&self, record: RawNodeRecord) {
        let address = normalize_address(&record.operator);
        if self.nodes.insert(address.clone(), record).is_none() {
            self.order.write().push(address);
        }
    }

    /// Every known address, in registration order
    pub fn all_nodes(&self) -> Vec<String> {
        self.order.read().clone()
    }

    fn credentials(&self) -> Option<&WriterCredentials> {
        self.writer.as_ref()
    }

    fn record_write(&self, entry: WriteEntry) {
        self.total_writes.fetch_add(1, Ordering::Relaxed);
        let mut journal = self.journal.write();
        journal.push(entry);
        // Rotation: keep within journal_max
        if journal.len() > self.journal_max {
            let drain_count = journal.len() - self.journal_max;
            journal.drain(..drain_count);
        }
    }

    pub fn total_writes(&self) -> u64 {
        self.total_writes.load(Ordering::Relaxed)
    }

}

#[async_trait]
impl RegistryGateway for SimulatedRegistry {
    fn name(&self) -> &str {
        "simulated"
    }

    fn can_write(&self) -> bool {
        self.writer.is_some()
    }

    async fn list_active_nodes(&self) -> RegistryResult<Vec<String>> {
        let order = self.order.read().clone();
        let mut active = Vec::new();
        for address in order {
            let Some(record) = self.nodes.get(&address) else {
                continue;
            };
            match decode_status(record.status) {
                Ok(NodeStatus::Active) => active.push(address.clone()),
                Ok(_) => {}
                Err(e) => warn!("Skipping {} in active listing: {}", address, e),
            }
        }
        Ok(active)
    }

    async fn read_node(&self, address: &str) -> RegistryResult<NodeState> {
        let key = normalize_address(address);
        let record = self
            .nodes
            .get(&key)
            .map(|r| r.value().clone())
            .ok_or(RegistryError::NotFound { address: key })?;
        record.decode()
    }

    async fn submit_batch_scores(
        &self,
        addresses: &[String],
        scores: &[u8],
    ) -> RegistryResult<WriteOutcome> {
        let Some(writer) = self.credentials() else {
            debug!("Read-only registry, skipping batch of {} scores", addresses.len());
            return Ok(WriteOutcome::Skipped);
        };
        if addresses.len() != scores.len() {
            return Err(RegistryError::MalformedInput(format!(
                "{} addresses but {} scores",
                addresses.len(),
                scores.len()
            )));
        }

        // All-or-nothing: validate every address before touching any record
        let keys: Vec<String> = addresses.iter().map(|a| normalize_address(a)).collect();
        if let Some(missing) = keys.iter().find(|k| !self.nodes.contains_key(*k)) {
            return Err(RegistryError::NotFound { address: missing.clone() });
        }
        for (key, score) in keys.iter().zip(scores) {
            if let Some(mut record) = self.nodes.get_mut(key) {
                record.reputation_score = *score as u64;
            }
        }

        self.record_write(WriteEntry::BatchScores {
            timestamp: Utc::now().to_rfc3339(),
            account: writer.account(),
            scores: keys.into_iter().zip(scores.iter().copied()).collect(),
        });
        Ok(WriteOutcome::Submitted)
    }

    async fn signal_reassignment(
        &self,
        address: &str,
        affected_jobs: u64,
    ) -> RegistryResult<WriteOutcome> {
        let Some(writer) = self.credentials() else {
            debug!("Read-only registry, skipping reassignment for {}", address);
            return Ok(WriteOutcome::Skipped);
        };
        let key = normalize_address(address);
        if !self.nodes.contains_key(&key) {
            return Err(RegistryError::NotFound { address: key });
        }
        self.record_write(WriteEntry::Reassignment {
            timestamp: Utc::now().to_rfc3339(),
            account: writer.account(),
            address: key,
            affected_jobs,
        });
        Ok(WriteOutcome::Submitted)
    }

    fn recent_writes(&self, limit: usize) -> Vec<serde_json::Value> {
        let journal = self.journal.read();
        journal
            .iter()
            .rev()
            .take(limit)
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect()
    }

    fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "adapter": self.name(),
            "write_enabled": self.can_write(),
            "account": self.writer.as_ref().map(|w| w.account()),
            "registered_nodes": self.all_nodes().len(),
            "total_writes": self.total_writes(),
            "journal_entries": self.journal.read().len(),
            "journal_max": self.journal_max,
        })
    }
}
