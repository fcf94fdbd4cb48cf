//! Prometheus-compatible metrics exporter for health-keeper
//!
//! Counters are bumped by the keeper tasks and the web facade and
//! rendered as text exposition format.
//!
//! Endpoint: GET /metrics (on the web port, default 8000)

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide counters, atomically updated
pub struct KeeperMetrics {
    /// Critical-check ticks that ran
    pub critical_ticks: AtomicU64,
    /// Critical-check ticks skipped because the previous run was in flight
    pub critical_skipped: AtomicU64,
    /// Critical-check ticks that could not list the active set
    pub critical_failures: AtomicU64,
    /// Batch-update ticks that ran
    pub batch_ticks: AtomicU64,
    pub batch_skipped: AtomicU64,
    /// Batch-update ticks that ended in an error
    pub batch_failures: AtomicU64,
    /// Nodes read and scored (keeper and on-demand)
    pub nodes_scored: AtomicU64,
    /// Per-node read failures
    pub node_failures: AtomicU64,
    /// Nodes found below the critical threshold
    pub critical_nodes: AtomicU64,
    pub reassignment_signals: AtomicU64,
    pub reassignment_failures: AtomicU64,
    pub batch_submissions: AtomicU64,
    /// Writes not sent because no credentials are configured
    pub writes_skipped: AtomicU64,
    pub start_time: Instant,
}

impl Default for KeeperMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl KeeperMetrics {
    pub fn new() -> Self {
        Self {
            critical_ticks: AtomicU64::new(0),
            critical_skipped: AtomicU64::new(0),
            critical_failures: AtomicU64::new(0),
            batch_ticks: AtomicU64::new(0),
            batch_skipped: AtomicU64::new(0),
            batch_failures: AtomicU64::new(0),
            nodes_scored: AtomicU64::new(0),
            node_failures: AtomicU64::new(0),
            critical_nodes: AtomicU64::new(0),
            reassignment_signals: AtomicU64::new(0),
            reassignment_failures: AtomicU64::new(0),
            batch_submissions: AtomicU64::new(0),
            writes_skipped: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> serde_json::Value {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "uptime_secs": self.start_time.elapsed().as_secs(),
            "critical_ticks": load(&self.critical_ticks),
            "critical_skipped": load(&self.critical_skipped),
            "critical_failures": load(&self.critical_failures),
            "batch_ticks": load(&self.batch_ticks),
            "batch_skipped": load(&self.batch_skipped),
            "batch_failures": load(&self.batch_failures),
            "nodes_scored": load(&self.nodes_scored),
            "node_failures": load(&self.node_failures),
            "critical_nodes": load(&self.critical_nodes),
            "reassignment_signals": load(&self.reassignment_signals),
            "reassignment_failures": load(&self.reassignment_failures),
            "batch_submissions": load(&self.batch_submissions),
            "writes_skipped": load(&self.writes_skipped),
        })
    }
}

/// Generate Prometheus-format metrics text
pub fn render_metrics(c: &KeeperMetrics, chain_connected: bool, write_enabled: bool) -> String {
    let mut out = String::with_capacity(4096);

    write_help_type(&mut out, "health_keeper_up", "Whether the keeper service is up.", "gauge");
    writeln!(out, "health_keeper_up 1").ok();

    write_help_type(&mut out, "health_keeper_uptime_seconds_total", "Uptime since service start in seconds.", "counter");
    writeln!(out, "health_keeper_uptime_seconds_total {:.3}", c.start_time.elapsed().as_secs_f64()).ok();

    write_help_type(&mut out, "health_keeper_registry_connected", "Whether a node registry is configured (0 = demo mode).", "gauge");
    writeln!(out, "health_keeper_registry_connected {}", chain_connected as u8).ok();

    write_help_type(&mut out, "health_keeper_registry_write_enabled", "Whether registry write credentials are configured.", "gauge");
    writeln!(out, "health_keeper_registry_write_enabled {}", write_enabled as u8).ok();

    write_help_type(&mut out, "health_keeper_ticks_total", "Keeper task runs, by task.", "counter");
    write_labeled(&mut out, "health_keeper_ticks_total", "task", "critical_check", c.critical_ticks.load(Ordering::Relaxed));
    write_labeled(&mut out, "health_keeper_ticks_total", "task", "batch_update", c.batch_ticks.load(Ordering::Relaxed));

    write_help_type(&mut out, "health_keeper_ticks_skipped_total", "Keeper ticks skipped because the previous run of the task was still in flight.", "counter");
    write_labeled(&mut out, "health_keeper_ticks_skipped_total", "task", "critical_check", c.critical_skipped.load(Ordering::Relaxed));
    write_labeled(&mut out, "health_keeper_ticks_skipped_total", "task", "batch_update", c.batch_skipped.load(Ordering::Relaxed));

    write_help_type(&mut out, "health_keeper_task_failures_total", "Keeper task runs that failed, by task.", "counter");
    write_labeled(&mut out, "health_keeper_task_failures_total", "task", "critical_check", c.critical_failures.load(Ordering::Relaxed));
    write_labeled(&mut out, "health_keeper_task_failures_total", "task", "batch_update", c.batch_failures.load(Ordering::Relaxed));

    write_help_type(&mut out, "health_keeper_nodes_scored_total", "Nodes read from the registry and scored.", "counter");
    writeln!(out, "health_keeper_nodes_scored_total {}", c.nodes_scored.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "health_keeper_node_failures_total", "Per-node registry read failures.", "counter");
    writeln!(out, "health_keeper_node_failures_total {}", c.node_failures.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "health_keeper_critical_nodes_total", "Nodes found below the critical score.", "counter");
    writeln!(out, "health_keeper_critical_nodes_total {}", c.critical_nodes.load(Ordering::Relaxed)).ok();

    write_help_type(&mut out, "health_keeper_registry_writes_total", "Registry writes, by kind and result.", "counter");
    write_labeled(&mut out, "health_keeper_registry_writes_total", "kind", "reassignment", c.reassignment_signals.load(Ordering::Relaxed));
    write_labeled(&mut out, "health_keeper_registry_writes_total", "kind", "reassignment_failed", c.reassignment_failures.load(Ordering::Relaxed));
    write_labeled(&mut out, "health_keeper_registry_writes_total", "kind", "batch_scores", c.batch_submissions.load(Ordering::Relaxed));
    write_labeled(&mut out, "health_keeper_registry_writes_total", "kind", "skipped", c.writes_skipped.load(Ordering::Relaxed));

    out
}

fn write_help_type(out: &mut String, name: &str, help: &str, metric_type: &str) {
    writeln!(out, "# HELP {} {}", name, help).ok();
    writeln!(out, "# TYPE {} {}", name, metric_type).ok();
}

fn write_labeled(out: &mut String, name: &str, label: &str, value: &str, count: u64) {
    writeln!(out, "{}{{{}=\"{}\"}} {}", name, label, value, count).ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let m = KeeperMetrics::new();
        KeeperMetrics::inc(&m.critical_ticks);
        KeeperMetrics::inc(&m.critical_ticks);
        KeeperMetrics::inc(&m.batch_skipped);
        KeeperMetrics::inc(&m.critical_failures);
        let text = render_metrics(&m, true, false);
        assert!(text.contains("health_keeper_up 1"));
        assert!(text.contains("health_keeper_ticks_total{task=\"critical_check\"} 2"));
        assert!(text.contains("health_keeper_ticks_skipped_total{task=\"batch_update\"} 1"));
        assert!(text.contains("health_keeper_task_failures_total{task=\"critical_check\"} 1"));
        assert!(text.contains("health_keeper_task_failures_total{task=\"batch_update\"} 0"));
        assert!(text.contains("health_keeper_registry_connected 1"));
        assert!(text.contains("health_keeper_registry_write_enabled 0"));
        assert!(text.contains("# TYPE health_keeper_nodes_scored_total counter"));
    }

    #[test]
    fn test_stats_json() {
        let m = KeeperMetrics::new();
        KeeperMetrics::inc(&m.nodes_scored);
        let stats = m.get_stats();
        assert_eq!(stats["nodes_scored"], 1);
        assert_eq!(stats["batch_failures"], 0);
    }
}
