use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;

/// Score below which a node is reported for reassignment
pub const CRITICAL_SCORE: u8 = 40;
/// Score below which a node is flagged for monitoring
pub const WARNING_SCORE: u8 = 70;
/// Score at or above which a node is considered healthy
pub const HEALTHY_SCORE: u8 = 80;

const SECS_PER_DAY: f64 = 86_400.0;
const PRODUCTIVE_JOBS_PER_DAY: f64 = 10.0;
const FAILED_JOBS_TOLERANCE: u64 = 3;
const FAILED_JOBS_PENALTY: f64 = 20.0;
const STALE_UPTIME_SCORE: u8 = 20;
const STALE_UPTIME_PENALTY: f64 = 10.0;
const PRODUCTIVITY_BONUS: f64 = 5.0;

/// Heartbeat recency buckets: (max age in seconds, exclusive) -> uptime score
const UPTIME_BUCKETS: [(i64, u8); 4] = [(300, 100), (900, 70), (3600, 40), (21_600, 10)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeType {
    Gpu,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Inactive,
    Active,
    Slashed,
}

/// Point-in-time snapshot of one node as reported by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeState {
    pub address: String,
    pub node_type: NodeType,
    pub status: NodeStatus,
    /// Native-token units
    pub staked_amount: f64,
    pub registered_at: i64,
    pub last_heartbeat: i64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub total_uptime: u64,
    pub reputation_score: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    Warning,
    Safe,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            s if s < CRITICAL_SCORE => RiskLevel::Critical,
            s if s < WARNING_SCORE => RiskLevel::Warning,
            _ => RiskLevel::Safe,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    pub address: String,
    pub predicted_score: u8,
    pub success_rate: f64,
    pub uptime_score: u8,
    pub stake_bonus: i64,
    pub trend: Trend,
    pub risk_level: RiskLevel,
    pub recommendation: String,
}

impl ScoreResult {
    pub fn is_critical(&self) -> bool {
        self.risk_level == RiskLevel::Critical
    }
}

/// Node health scorer
///
/// Stateless apart from its weights, so one instance is shared by the
/// keeper and the web facade.
///
/// Formula:
///   success   = completed / (completed + failed) * weight_success   (35 with no history)
///   uptime    = bucket(now - last_heartbeat) * weight_uptime / 100
///   stake     = weight_stake scaled by stake tier (1x, 0.7x, 0.4x, 0)
///   score     = success + uptime + stake - penalties + productivity bonus
///   result    = clamp(trunc(score), 0, 100)
#[derive(Debug, Clone)]
pub struct HealthScorer {
    config: ScoringConfig,
}

impl Default for HealthScorer {
    fn default() -> Self {
        Self::new(&ScoringConfig::default())
    }
}

impl HealthScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Score a node against the current wall clock
    pub fn predict(&self, node: &NodeState) -> ScoreResult {
        self.predict_at(node, chrono::Utc::now().timestamp())
    }

    pub fn predict_batch(&self, nodes: &[NodeState]) -> Vec<ScoreResult> {
        self.predict_batch_at(nodes, chrono::Utc::now().timestamp())
    }

    pub fn predict_batch_at(&self, nodes: &[NodeState], now: i64) -> Vec<ScoreResult> {
        nodes.iter().map(|n| self.predict_at(n, now)).collect()
    }

    /// Score a node for a fixed `now` (Unix seconds)
    pub fn predict_at(&self, node: &NodeState, now: i64) -> ScoreResult {
        // f64 so counters near u64::MAX cannot overflow
        let total = node.jobs_completed as f64 + node.jobs_failed as f64;
        let (success_rate, success_component) = if total > 0.0 {
            let rate = node.jobs_completed as f64 / total;
            (rate, rate * self.config.weight_success)
        } else {
            (0.5, self.config.weight_success / 2.0)
        };

        let uptime_score = uptime_bucket(now - node.last_heartbeat);
        let uptime_component = uptime_score as f64 * self.config.weight_uptime / 100.0;

        let stake_bonus = self.stake_bonus(node.staked_amount);

        let mut score = success_component + uptime_component + stake_bonus as f64;
        if node.jobs_failed > FAILED_JOBS_TOLERANCE {
            score -= FAILED_JOBS_PENALTY;
        }
        if uptime_score < STALE_UPTIME_SCORE {
            score -= STALE_UPTIME_PENALTY;
        }

        let days = ((now - node.registered_at) as f64 / SECS_PER_DAY).max(1.0);
        if node.jobs_completed as f64 / days > PRODUCTIVE_JOBS_PER_DAY {
            score += PRODUCTIVITY_BONUS;
        }

        // Truncate first, then clamp
        let predicted_score = (score as i64).clamp(0, 100) as u8;

        ScoreResult {
            address: node.address.clone(),
            predicted_score,
            success_rate: (success_rate * 10_000.0).round() / 10_000.0,
            uptime_score,
            stake_bonus,
            trend: trend(uptime_score, success_rate),
            risk_level: RiskLevel::from_score(predicted_score),
            recommendation: recommendation(predicted_score),
        }
    }

    fn stake_bonus(&self, staked: f64) -> i64 {
        let min = self.config.min_stake;
        let weight = self.config.weight_stake;
        if staked >= 3.0 * min {
            weight
        } else if staked >= 2.0 * min {
            (weight as f64 * 0.7).floor() as i64
        } else if staked >= min {
            (weight as f64 * 0.4).floor() as i64
        } else {
            0
        }
    }
}

/// Heartbeat age to uptime score. A heartbeat from the future counts as fresh.
fn uptime_bucket(age_secs: i64) -> u8 {
    UPTIME_BUCKETS
        .iter()
        .find(|(max_age, _)| age_secs < *max_age)
        .map(|(_, score)| *score)
        .unwrap_or(0)
}

fn trend(uptime_score: u8, success_rate: f64) -> Trend {
    if uptime_score >= 70 && success_rate >= 0.9 {
        Trend::Up
    } else if uptime_score < 40 || success_rate < 0.7 {
        Trend::Down
    } else {
        Trend::Stable
    }
}

fn recommendation(score: u8) -> String {
    if score >= HEALTHY_SCORE {
        return "Node healthy.".to_string();
    }
    let marker = if score < CRITICAL_SCORE {
        "⚠️ CRITICAL risk."
    } else {
        "Monitor closely."
    };
    format!("Score {}. {}", score, marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_750_000_000;
    const DAY: i64 = 86_400;

    fn node(completed: u64, failed: u64, stake: f64, heartbeat_age: i64) -> NodeState {
        NodeState {
            address: "0xabc".to_string(),
            node_type: NodeType::Gpu,
            status: NodeStatus::Active,
            staked_amount: stake,
            registered_at: NOW - 30 * DAY,
            last_heartbeat: NOW - heartbeat_age,
            jobs_completed: completed,
            jobs_failed: failed,
            total_uptime: 0,
            reputation_score: 0,
        }
    }

    #[test]
    fn test_end_to_end_example() {
        let scorer = HealthScorer::default();
        let r = scorer.predict_at(&node(18, 2, 0.2, 100), NOW);
        assert_eq!(r.success_rate, 0.9);
        assert_eq!(r.uptime_score, 100);
        assert_eq!(r.stake_bonus, 5);
        assert_eq!(r.predicted_score, 93);
        assert_eq!(r.risk_level, RiskLevel::Safe);
        assert_eq!(r.trend, Trend::Up);
        assert_eq!(r.recommendation, "Node healthy.");
        assert_eq!(r.address, "0xabc");
    }

    #[test]
    fn test_no_history_is_neutral() {
        let scorer = HealthScorer::default();
        // 35 success + 25 uptime + 0 stake
        let r = scorer.predict_at(&node(0, 0, 0.0, 0), NOW);
        assert_eq!(r.success_rate, 0.5);
        assert_eq!(r.predicted_score, 60);
        assert_eq!(r.trend, Trend::Down);
        assert_eq!(r.risk_level, RiskLevel::Warning);
        assert_eq!(r.recommendation, "Score 60. Monitor closely.");
    }

    #[test]
    fn test_heartbeat_boundaries_fall_into_stricter_bucket() {
        let scorer = HealthScorer::default();
        let cases = [
            (299, 100),
            (300, 70),
            (899, 70),
            (900, 40),
            (3600, 10),
            (21_599, 10),
            (21_600, 0),
            (-500, 100),
        ];
        for (age, expected) in cases {
            let r = scorer.predict_at(&node(1, 0, 0.0, age), NOW);
            assert_eq!(r.uptime_score, expected, "heartbeat age {}", age);
        }
    }

    #[test]
    fn test_stake_tiers() {
        let scorer = HealthScorer::default();
        let bonus = |stake| scorer.predict_at(&node(1, 0, stake, 0), NOW).stake_bonus;
        assert_eq!(bonus(0.0), 0);
        assert_eq!(bonus(0.049), 0);
        assert_eq!(bonus(0.05), 2);
        assert_eq!(bonus(0.12), 3);
        assert_eq!(bonus(0.2), 5);
        assert_eq!(bonus(10.0), 5);
    }

    #[test]
    fn test_failed_jobs_penalty_is_exactly_twenty() {
        let scorer = HealthScorer::default();
        // Same success rate, so only the penalty differs
        let few = scorer.predict_at(&node(30, 3, 0.2, 1000), NOW);
        let many = scorer.predict_at(&node(40, 4, 0.2, 1000), NOW);
        assert_eq!(few.success_rate, many.success_rate);
        assert_eq!(few.predicted_score - many.predicted_score, 20);
    }

    #[test]
    fn test_more_completed_jobs_never_lowers_score() {
        let scorer = HealthScorer::default();
        for failed in [0, 2, 5] {
            let mut last = 0;
            for completed in 0..400 {
                let r = scorer.predict_at(&node(completed, failed, 0.1, 1000), NOW);
                assert!(
                    r.predicted_score >= last,
                    "score dropped at completed={} failed={}",
                    completed,
                    failed
                );
                last = r.predicted_score;
            }
        }
    }

    #[test]
    fn test_productivity_bonus() {
        let scorer = HealthScorer::default();
        let mut n = node(11, 0, 0.0, 1000);
        // Registered an hour ago: days floors to 1, 11 jobs/day > 10
        n.registered_at = NOW - 3600;
        let fresh = scorer.predict_at(&n, NOW);
        n.registered_at = NOW - 30 * DAY;
        let old = scorer.predict_at(&n, NOW);
        assert_eq!(fresh.predicted_score - old.predicted_score, 5);
    }

    #[test]
    fn test_score_clamped_to_range() {
        let scorer = HealthScorer::default();
        let worst = scorer.predict_at(&node(0, 50, 0.0, 100_000), NOW);
        assert_eq!(worst.predicted_score, 0);
        assert_eq!(worst.success_rate, 0.0);
        assert_eq!(worst.risk_level, RiskLevel::Critical);
        assert_eq!(worst.recommendation, "Score 0. ⚠️ CRITICAL risk.");

        let mut best = node(10_000, 0, 5.0, 0);
        best.registered_at = NOW;
        let r = scorer.predict_at(&best, NOW);
        assert_eq!(r.predicted_score, 100);
        assert_eq!(r.success_rate, 1.0);
    }

    #[test]
    fn test_huge_job_counters_stay_in_range() {
        let scorer = HealthScorer::default();
        let r = scorer.predict_at(&node(u64::MAX, 1, 0.2, 100), NOW);
        assert!(r.predicted_score <= 100);
        assert_eq!(r.success_rate, 1.0);

        let r = scorer.predict_at(&node(u64::MAX, u64::MAX, 0.0, 100), NOW);
        assert!(r.predicted_score <= 100);
        assert_eq!(r.success_rate, 0.5);
    }

    #[test]
    fn test_success_rate_rounded_to_four_places() {
        let scorer = HealthScorer::default();
        let r = scorer.predict_at(&node(2, 1, 0.0, 0), NOW);
        assert_eq!(r.success_rate, 0.6667);
    }

    #[test]
    fn test_trend_thresholds() {
        assert_eq!(trend(70, 0.9), Trend::Up);
        assert_eq!(trend(100, 0.89), Trend::Stable);
        assert_eq!(trend(40, 0.95), Trend::Stable);
        assert_eq!(trend(10, 1.0), Trend::Down);
        assert_eq!(trend(100, 0.69), Trend::Down);
    }

    #[test]
    fn test_risk_levels() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(39), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(40), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_score(69), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_score(70), RiskLevel::Safe);
    }

    #[test]
    fn test_deterministic_and_batch_consistent() {
        let scorer = HealthScorer::default();
        let nodes = vec![
            node(18, 2, 0.2, 100),
            node(0, 0, 0.0, 50_000),
            node(3, 9, 0.07, 1200),
        ];
        let batch = scorer.predict_batch_at(&nodes, NOW);
        assert_eq!(batch.len(), nodes.len());
        for (n, r) in nodes.iter().zip(&batch) {
            assert_eq!(&scorer.predict_at(n, NOW), r);
            assert_eq!(scorer.predict_at(n, NOW), scorer.predict_at(n, NOW));
        }
        assert!(scorer.predict_batch_at(&[], NOW).is_empty());
    }

    #[test]
    fn test_serializes_camel_case() {
        let r = HealthScorer::default().predict_at(&node(18, 2, 0.2, 100), NOW);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["predictedScore"], 93);
        assert_eq!(json["riskLevel"], "safe");
        assert_eq!(json["trend"], "up");
        assert_eq!(json["stakeBonus"], 5);
    }
}
