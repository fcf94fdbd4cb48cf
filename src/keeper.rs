use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{KeeperConfig, SignalRetryConfig};
use crate::metrics::KeeperMetrics;
use crate::registry::{RegistryError, RegistryGateway, RegistryResult, WriteOutcome};
use crate::scoring::HealthScorer;

/// Keeper - 定期ヘルスチェック
///
/// Two independent periodic tasks against the registry:
/// - critical check: signal reassignment for every node scoring critical
/// - batch update: push the whole active set's scores in one write
///
/// Each task runs at most once at a time. A tick that fires while the
/// previous run of the same task is still going is skipped.
pub struct Keeper {
    registry: Arc<dyn RegistryGateway>,
    scorer: Arc<HealthScorer>,
    metrics: Arc<KeeperMetrics>,
    critical_interval: Duration,
    batch_interval: Duration,
    retry: SignalRetryConfig,
    critical_guard: TaskGuard,
    batch_guard: TaskGuard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeeperTask {
    CriticalCheck,
    BatchUpdate,
}

impl KeeperTask {
    pub fn name(&self) -> &'static str {
        match self {
            KeeperTask::CriticalCheck => "critical_check",
            KeeperTask::BatchUpdate => "batch_update",
        }
    }
}

/// Non-blocking "one run in flight" flag
#[derive(Clone, Default)]
struct TaskGuard {
    running: Arc<AtomicBool>,
}

/// Held by the run in flight; releases the guard on drop
struct TaskPermit {
    running: Arc<AtomicBool>,
}

impl TaskGuard {
    fn try_acquire(&self) -> Option<TaskPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TaskPermit {
                running: self.running.clone(),
            })
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for TaskPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CriticalCheckReport {
    /// Active nodes listed
    pub scanned: usize,
    /// Addresses that scored critical, in list order
    pub critical: Vec<String>,
    /// Reassignment signals the registry accepted
    pub signaled: usize,
    pub failed_reads: Vec<String>,
    pub failed_signals: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchUpdateReport {
    pub nodes: usize,
    /// None when there was nothing to submit
    pub outcome: Option<WriteOutcome>,
}

/// Stops the schedulers of a started keeper
pub struct KeeperHandle {
    shutdown: watch::Sender<bool>,
    schedulers: Vec<JoinHandle<()>>,
}

impl KeeperHandle {
    /// Cancel all future ticks. Runs already in flight finish detached.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop and wait for both scheduler loops to exit
    pub async fn shutdown(self) {
        self.stop();
        for handle in self.schedulers {
            if let Err(e) = handle.await {
                warn!("Keeper scheduler ended abnormally: {}", e);
            }
        }
    }
}

impl Keeper {
    pub fn new(
        registry: Arc<dyn RegistryGateway>,
        scorer: Arc<HealthScorer>,
        metrics: Arc<KeeperMetrics>,
        config: &KeeperConfig,
    ) -> Self {
        Self {
            registry,
            scorer,
            metrics,
            critical_interval: Duration::from_secs(config.critical_interval_secs),
            batch_interval: Duration::from_secs(config.batch_interval_secs),
            retry: config.signal_retry.clone(),
            critical_guard: TaskGuard::default(),
            batch_guard: TaskGuard::default(),
        }
    }

    /// Spawn both schedulers. First ticks fire one full period after start.
    pub fn start(self: &Arc<Self>) -> KeeperHandle {
        let (shutdown, rx) = watch::channel(false);
        let schedulers = vec![
            self.spawn_schedule(KeeperTask::CriticalCheck, self.critical_interval, rx.clone()),
            self.spawn_schedule(KeeperTask::BatchUpdate, self.batch_interval, rx),
        ];
        info!(
            "Keeper started (critical check every {:?}, batch update every {:?}, registry: {})",
            self.critical_interval,
            self.batch_interval,
            self.registry.name()
        );
        KeeperHandle { shutdown, schedulers }
    }

    fn spawn_schedule(
        self: &Arc<Self>,
        task: KeeperTask,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let keeper = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => keeper.fire(task),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Keeper {} scheduler stopped", task.name());
        })
    }

    fn guard(&self, task: KeeperTask) -> &TaskGuard {
        match task {
            KeeperTask::CriticalCheck => &self.critical_guard,
            KeeperTask::BatchUpdate => &self.batch_guard,
        }
    }

    /// Start one run of `task` unless the previous run is still going
    fn fire(self: &Arc<Self>, task: KeeperTask) {
        let Some(permit) = self.guard(task).try_acquire() else {
            warn!("Keeper {} tick skipped: previous run still in flight", task.name());
            match task {
                KeeperTask::CriticalCheck => KeeperMetrics::inc(&self.metrics.critical_skipped),
                KeeperTask::BatchUpdate => KeeperMetrics::inc(&self.metrics.batch_skipped),
            }
            return;
        };
        let keeper = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            keeper.run_task(task).await;
        });
    }

    /// Run one task to completion. Errors are logged here and go no further.
    pub async fn run_task(&self, task: KeeperTask) {
        match task {
            KeeperTask::CriticalCheck => {
                KeeperMetrics::inc(&self.metrics.critical_ticks);
                match self.check_critical().await {
                    Ok(report) => debug!(
                        "Critical check done: {} scanned, {} critical, {} signaled",
                        report.scanned,
                        report.critical.len(),
                        report.signaled
                    ),
                    Err(e) => {
                        KeeperMetrics::inc(&self.metrics.critical_failures);
                        error!("[critical_check] listing failed: {}", e);
                    }
                }
            }
            KeeperTask::BatchUpdate => {
                KeeperMetrics::inc(&self.metrics.batch_ticks);
                if let Err(e) = self.batch_update().await {
                    KeeperMetrics::inc(&self.metrics.batch_failures);
                    error!("[batch_update] failed: {}", e);
                }
            }
        }
    }

    /// Score every active node and signal reassignment for critical ones.
    /// Per-node failures are logged and skipped; only a failed listing
    /// aborts the run.
    pub async fn check_critical(&self) -> RegistryResult<CriticalCheckReport> {
        let active = self.registry.list_active_nodes().await?;
        let mut report = CriticalCheckReport {
            scanned: active.len(),
            ..Default::default()
        };

        for address in active {
            let node = match self.registry.read_node(&address).await {
                Ok(node) => node,
                Err(e) => {
                    KeeperMetrics::inc(&self.metrics.node_failures);
                    warn!("[critical_check] failed to read {}: {}", address, e);
                    report.failed_reads.push(address);
                    continue;
                }
            };

            let result = self.scorer.predict(&node);
            KeeperMetrics::inc(&self.metrics.nodes_scored);
            if !result.is_critical() {
                continue;
            }

            KeeperMetrics::inc(&self.metrics.critical_nodes);
            warn!("⚠️ Critical: {} ({})", address, result.predicted_score);

            match self.signal_with_retry(&address).await {
                Ok(WriteOutcome::Submitted) => {
                    KeeperMetrics::inc(&self.metrics.reassignment_signals);
                    report.signaled += 1;
                }
                Ok(WriteOutcome::Skipped) => KeeperMetrics::inc(&self.metrics.writes_skipped),
                Err(e) => {
                    KeeperMetrics::inc(&self.metrics.reassignment_failures);
                    warn!("[critical_check] reassignment signal for {} failed: {}", address, e);
                    report.failed_signals.push(address.clone());
                }
            }
            report.critical.push(address);
        }

        Ok(report)
    }

    async fn signal_with_retry(&self, address: &str) -> RegistryResult<WriteOutcome> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.registry.signal_reassignment(address, 0).await {
                // TransientWrite only; read-side failures are final
                Err(RegistryError::TransientWrite(e)) if attempt < max_attempts => {
                    debug!(
                        "Reassignment signal for {} failed (attempt {}/{}): {}",
                        address, attempt, max_attempts, e
                    );
                    tokio::time::sleep(Duration::from_millis(self.retry.backoff_ms)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Score the whole active set and submit it as one write.
    /// Any failure aborts the run; the next tick starts over.
    pub async fn batch_update(&self) -> RegistryResult<BatchUpdateReport> {
        let active = self.registry.list_active_nodes().await?;
        if active.is_empty() {
            debug!("Batch update: no active nodes");
            return Ok(BatchUpdateReport {
                nodes: 0,
                outcome: None,
            });
        }

        let mut nodes = Vec::with_capacity(active.len());
        for address in &active {
            match self.registry.read_node(address).await {
                Ok(node) => nodes.push(node),
                Err(e) => {
                    KeeperMetrics::inc(&self.metrics.node_failures);
                    warn!("[batch_update] cannot read {}, batch aborted: {}", address, e);
                    return Err(e);
                }
            }
        }
        self.metrics
            .nodes_scored
            .fetch_add(nodes.len() as u64, Ordering::Relaxed);

        let scores: Vec<u8> = self
            .scorer
            .predict_batch(&nodes)
            .iter()
            .map(|r| r.predicted_score)
            .collect();

        let outcome = self.registry.submit_batch_scores(&active, &scores).await?;
        match outcome {
            WriteOutcome::Submitted => {
                KeeperMetrics::inc(&self.metrics.batch_submissions);
                info!("Batch update submitted {} scores", scores.len());
            }
            WriteOutcome::Skipped => KeeperMetrics::inc(&self.metrics.writes_skipped),
        }

        Ok(BatchUpdateReport {
            nodes: active.len(),
            outcome: Some(outcome),
        })
    }

    pub fn get_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "critical_interval_secs": self.critical_interval.as_secs(),
            "batch_interval_secs": self.batch_interval.as_secs(),
            "critical_running": self.critical_guard.is_running(),
            "batch_running": self.batch_guard.is_running(),
            "signal_max_attempts": self.retry.max_attempts,
        })
    }

    #[cfg(test)]
    fn with_intervals(mut self, critical: Duration, batch: Duration) -> Self {
        self.critical_interval = critical;
        self.batch_interval = batch;
        self
    }
}
