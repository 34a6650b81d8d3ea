//! HealthAggregator (§4.7): rolls per-target HealthStatus into one overall
//! system status.
use serde::Serialize;

use crate::ports::health::HealthChecker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

pub struct HealthAggregator {
    checker: std::sync::Arc<dyn HealthChecker>,
}

impl HealthAggregator {
    pub fn new(checker: std::sync::Arc<dyn HealthChecker>) -> Self {
        Self { checker }
    }

    /// Healthy if every target is healthy; Unhealthy if there are no
    /// targets at all; Degraded if some are unhealthy but healthy
    /// targets outnumber unhealthy ones; Unhealthy otherwise.
    pub fn compute(&self) -> OverallStatus {
        let all = self.checker.get_all_target_status();
        if all.is_empty() {
            return OverallStatus::Unhealthy;
        }
        let healthy = all.iter().filter(|(_, status)| status.healthy).count();
        let unhealthy = all.len() - healthy;
        if unhealthy == 0 {
            OverallStatus::Healthy
        } else if healthy > unhealthy {
            OverallStatus::Degraded
        } else {
            OverallStatus::Unhealthy
        }
    }

    pub fn checker(&self) -> &std::sync::Arc<dyn HealthChecker> {
        &self.checker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::health::{HealthEvent, HealthStatus, HealthTarget};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct FakeChecker {
        statuses: Mutex<Vec<(String, HealthStatus)>>,
    }

    impl HealthChecker for FakeChecker {
        fn register_target(&self, _target: HealthTarget) {}
        fn unregister_target(&self, _name: &str) {}
        fn get_target_status(&self, name: &str) -> Option<HealthStatus> {
            self.statuses.lock().unwrap().iter().find(|(n, _)| n == name).map(|(_, s)| s.clone())
        }
        fn get_all_target_status(&self) -> Vec<(String, HealthStatus)> {
            self.statuses.lock().unwrap().clone()
        }
        fn subscribe(&self) -> mpsc::Receiver<HealthEvent> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    fn status(healthy: bool) -> HealthStatus {
        let mut s = HealthStatus::initial();
        s.healthy = healthy;
        s
    }

    #[test]
    fn no_targets_is_unhealthy() {
        let checker = std::sync::Arc::new(FakeChecker { statuses: Mutex::new(vec![]) });
        let aggregator = HealthAggregator::new(checker);
        assert_eq!(aggregator.compute(), OverallStatus::Unhealthy);
    }

    #[test]
    fn all_healthy_is_healthy() {
        let checker = std::sync::Arc::new(FakeChecker {
            statuses: Mutex::new(vec![("a".into(), status(true)), ("b".into(), status(true))]),
        });
        let aggregator = HealthAggregator::new(checker);
        assert_eq!(aggregator.compute(), OverallStatus::Healthy);
    }

    #[test]
    fn majority_healthy_is_degraded() {
        let checker = std::sync::Arc::new(FakeChecker {
            statuses: Mutex::new(vec![
                ("a".into(), status(true)),
                ("b".into(), status(true)),
                ("c".into(), status(false)),
            ]),
        });
        let aggregator = HealthAggregator::new(checker);
        assert_eq!(aggregator.compute(), OverallStatus::Degraded);
    }

    #[test]
    fn majority_unhealthy_is_unhealthy() {
        let checker = std::sync::Arc::new(FakeChecker {
            statuses: Mutex::new(vec![("a".into(), status(true)), ("b".into(), status(false))]),
        });
        let aggregator = HealthAggregator::new(checker);
        assert_eq!(aggregator.compute(), OverallStatus::Unhealthy);
    }
}
