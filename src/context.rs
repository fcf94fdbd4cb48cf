use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::keeper::{Keeper, KeeperHandle};
use crate::metrics::KeeperMetrics;
use crate::registry::demo::{demo_critical_node, demo_node};
use crate::registry::simulated::{SimulatedRegistry, WriterCredentials};
use crate::registry::timeout::TimeoutGateway;
use crate::registry::{RegistryGateway, RegistryResult, WriteOutcome};
use crate::scoring::{HealthScorer, NodeState, ScoreResult};

/// Process-wide service state, built once in `main` and shared by the
/// keeper and the web facade
pub struct ServiceContext {
    pub config: Arc<Config>,
    pub scorer: Arc<HealthScorer>,
    pub metrics: Arc<KeeperMetrics>,
    /// None in demo mode
    registry: Option<Arc<dyn RegistryGateway>>,
    keeper: Option<Arc<Keeper>>,
    keeper_handle: Mutex<Option<KeeperHandle>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchScoreOutcome {
    pub scores: Vec<ScoreResult>,
    pub updated_on_chain: bool,
}

impl ServiceContext {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let registry = match &config.registry.nodes_file {
            Some(path) => {
                let writer = config.registry.writer_key.clone().map(WriterCredentials::new);
                match &writer {
                    Some(w) => info!("🔗 Registry writes enabled (account {})", w.account()),
                    None => warn!("⚠️ No writer key: registry writes disabled (read-only mode)"),
                }
                let simulated = SimulatedRegistry::from_file(
                    path,
                    writer,
                    config.registry.journal_max_entries,
                )?;
                let gateway: Arc<dyn RegistryGateway> = Arc::new(TimeoutGateway::new(
                    Arc::new(simulated),
                    Duration::from_millis(config.registry.read_timeout_ms),
                    Duration::from_millis(config.registry.write_timeout_ms),
                ));
                Some(gateway)
            }
            None => {
                warn!("⚠️ No registry configured: running in demo mode");
                None
            }
        };
        Ok(Self::with_registry(config, registry))
    }

    pub fn with_registry(config: Arc<Config>, registry: Option<Arc<dyn RegistryGateway>>) -> Self {
        let scorer = Arc::new(HealthScorer::new(&config.scoring));
        let metrics = Arc::new(KeeperMetrics::new());
        let keeper = registry.as_ref().map(|r| {
            Arc::new(Keeper::new(
                r.clone(),
                scorer.clone(),
                metrics.clone(),
                &config.keeper,
            ))
        });
        Self {
            config,
            scorer,
            metrics,
            registry,
            keeper,
            keeper_handle: Mutex::new(None),
        }
    }

    pub fn is_demo(&self) -> bool {
        self.registry.is_none()
    }

    pub fn write_enabled(&self) -> bool {
        self.registry.as_ref().is_some_and(|r| r.can_write())
    }

    /// Start the keeper schedulers. No-op in demo mode, when disabled,
    /// or when already running.
    pub fn start_keeper(&self) -> bool {
        let Some(keeper) = &self.keeper else {
            info!("Keeper not started (demo mode)");
            return false;
        };
        if !self.config.keeper.enabled {
            info!("Keeper disabled");
            return false;
        }
        let mut handle = self.keeper_handle.lock();
        if handle.is_some() {
            return false;
        }
        *handle = Some(keeper.start());
        true
    }

    /// Cancel future keeper ticks. In-flight runs are not awaited.
    pub async fn shutdown(&self) {
        let handle = self.keeper_handle.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
            info!("Keeper stopped");
        }
    }

    pub fn keeper_running(&self) -> bool {
        self.keeper_handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_stopped())
    }

    async fn load_node(&self, address: &str) -> RegistryResult<NodeState> {
        match &self.registry {
            Some(registry) => registry.read_node(address).await,
            None => Ok(demo_node(address, chrono::Utc::now().timestamp())),
        }
    }

    fn score(&self, node: &NodeState) -> ScoreResult {
        KeeperMetrics::inc(&self.metrics.nodes_scored);
        self.scorer.predict(node)
    }

    /// Score one node on demand
    pub async fn score_node(&self, address: &str) -> RegistryResult<ScoreResult> {
        let node = self.load_node(address).await?;
        Ok(self.score(&node))
    }

    /// Score a list of nodes and try to push the scores to the registry.
    /// A failed or skipped write only shows up as `updated_on_chain = false`.
    pub async fn score_batch(&self, addresses: &[String]) -> RegistryResult<BatchScoreOutcome> {
        let mut scores = Vec::with_capacity(addresses.len());
        for address in addresses {
            let node = self.load_node(address).await?;
            scores.push(self.score(&node));
        }

        let mut updated_on_chain = false;
        if let (Some(registry), false) = (&self.registry, scores.is_empty()) {
            let submitted: Vec<String> = scores.iter().map(|s| s.address.clone()).collect();
            let values: Vec<u8> = scores.iter().map(|s| s.predicted_score).collect();
            match registry.submit_batch_scores(&submitted, &values).await {
                Ok(WriteOutcome::Submitted) => {
                    KeeperMetrics::inc(&self.metrics.batch_submissions);
                    updated_on_chain = true;
                }
                Ok(WriteOutcome::Skipped) => KeeperMetrics::inc(&self.metrics.writes_skipped),
                Err(e) => warn!("On-demand batch submit of {} scores failed: {}", values.len(), e),
            }
        }

        Ok(BatchScoreOutcome {
            scores,
            updated_on_chain,
        })
    }

    /// Every active node currently scoring critical
    pub async fn critical_nodes(&self) -> RegistryResult<Vec<ScoreResult>> {
        let Some(registry) = &self.registry else {
            let node = demo_critical_node(chrono::Utc::now().timestamp());
            return Ok(vec![self.score(&node)]);
        };

        let mut critical = Vec::new();
        for address in registry.list_active_nodes().await? {
            let node = registry.read_node(&address).await?;
            let result = self.score(&node);
            if result.is_critical() {
                critical.push(result);
            }
        }
        Ok(critical)
    }

    /// Score of one randomly picked node for the live feed.
    /// Demo mode invents a fresh address each time.
    pub async fn sample_live_score(&self) -> RegistryResult<Option<ScoreResult>> {
        let address = match &self.registry {
            Some(registry) => {
                let active = registry.list_active_nodes().await?;
                match pick_random(&active) {
                    Some(address) => address,
                    None => return Ok(None),
                }
            }
            None => random_address(),
        };
        self.score_node(&address).await.map(Some)
    }

    pub fn recent_writes(&self, limit: usize) -> Vec<serde_json::Value> {
        self.registry
            .as_ref()
            .map(|r| r.recent_writes(limit))
            .unwrap_or_default()
    }

    /// Get stats for the web API
    pub fn get_stats(&self) -> serde_json::Value {
        let mut stats = serde_json::json!({
            "mode": if self.is_demo() { "demo" } else { "registry" },
            "keeper_running": self.keeper_running(),
            "metrics": self.metrics.get_stats(),
        });
        if let Some(ref registry) = self.registry {
            stats["registry"] = registry.get_stats();
        }
        if let Some(ref keeper) = self.keeper {
            stats["keeper"] = keeper.get_stats();
        }
        stats
    }
}

fn pick_random(addresses: &[String]) -> Option<String> {
    let mut rng = rand::thread_rng();
    addresses.choose(&mut rng).cloned()
}

fn random_address() -> String {
    let bytes: [u8; 20] = rand::thread_rng().gen();
    format!("0x{}", hex::encode(bytes))
}
