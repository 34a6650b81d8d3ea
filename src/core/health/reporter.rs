//! Reporter (§4.7): renders the aggregator's view as the three shapes
//! consumed by the `/health`, `/ready`, and `/live` endpoints.
use std::time::Instant;

use serde::Serialize;

use super::aggregator::{HealthAggregator, OverallStatus};

#[derive(Debug, Clone, Serialize)]
pub struct TargetDetail {
    pub name: String,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_status_code: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub timestamp: String,
    pub version: String,
    pub uptime_secs: u64,
    pub targets: Vec<TargetDetail>,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessCheck {
    pub name: String,
    pub pass: bool,
    pub duration_ms: u128,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub checks: Vec<ReadinessCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LivenessReport {
    pub alive: bool,
    pub check_duration_ms: u128,
}

pub struct Reporter {
    aggregator: HealthAggregator,
    started_at: Instant,
    version: String,
}

impl Reporter {
    pub fn new(aggregator: HealthAggregator, version: impl Into<String>) -> Self {
        Self { aggregator, started_at: Instant::now(), version: version.into() }
    }

    pub fn health_report(&self) -> HealthReport {
        let start = Instant::now();
        let status = self.aggregator.compute();
        let all = self.aggregator.checker().get_all_target_status();
        let total = all.len();
        let healthy = all.iter().filter(|(_, s)| s.healthy).count();
        let unhealthy = total - healthy;
        let targets = all
            .into_iter()
            .map(|(name, s)| TargetDetail {
                name,
                healthy: s.healthy,
                consecutive_failures: s.consecutive_failures,
                consecutive_successes: s.consecutive_successes,
                last_status_code: s.last_status_code,
                error: s.error,
            })
            .collect();
        let success_rate = if total == 0 { 0.0 } else { healthy as f64 / total as f64 };
        let _ = start.elapsed();
        HealthReport {
            status,
            timestamp: humantime::format_rfc3339(std::time::SystemTime::now()).to_string(),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            targets,
            summary: Summary { total, healthy, unhealthy, success_rate },
        }
    }

    pub fn readiness_report(&self) -> ReadinessReport {
        let status = self.aggregator.compute();
        let ready = matches!(status, OverallStatus::Healthy | OverallStatus::Degraded);
        let checks = self
            .aggregator
            .checker()
            .get_all_target_status()
            .into_iter()
            .map(|(name, s)| ReadinessCheck {
                name,
                pass: s.healthy,
                duration_ms: s.response_time.as_millis(),
                error: s.error,
            })
            .collect();
        ReadinessReport { ready, checks }
    }

    /// Always reports alive as long as the aggregator round-trip
    /// completes; the round-trip duration itself is the liveness check.
    pub fn liveness_report(&self) -> LivenessReport {
        let start = Instant::now();
        let _ = self.aggregator.compute();
        LivenessReport { alive: true, check_duration_ms: start.elapsed().as_millis() }
    }
}
