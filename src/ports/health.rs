//! Port for the HealthChecker capability (§4.5) and the Target/Status/Event
//! data model (§3).
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;

use crate::errors::ProxyError;

#[derive(Debug, Clone)]
pub struct HealthTarget {
    pub name: String,
    pub url: String,
    pub timeout: Duration,
    pub expected_status: u16,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: SystemTime,
    pub response_time: Duration,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_status_code: Option<u16>,
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn initial() -> Self {
        Self {
            healthy: true,
            last_check: SystemTime::now(),
            response_time: Duration::ZERO,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_status_code: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEventType {
    Started,
    Passed,
    Failed,
    Recovered,
    Degraded,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub target_name: String,
    pub old: Option<HealthSnapshot>,
    pub new: HealthSnapshot,
    pub timestamp: SystemTime,
    pub event_type: HealthEventType,
}

/// A compact, cloneable snapshot of `HealthStatus` suitable for carrying on
/// an event without cloning the full record's `error` string twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub healthy: bool,
}

impl From<&HealthStatus> for HealthSnapshot {
    fn from(status: &HealthStatus) -> Self {
        Self { healthy: status.healthy }
    }
}

/// Port for the periodic-probe health checker (§4.5).
pub trait HealthChecker: Send + Sync + 'static {
    fn register_target(&self, target: HealthTarget);
    fn unregister_target(&self, name: &str);
    fn get_target_status(&self, name: &str) -> Option<HealthStatus>;
    fn get_all_target_status(&self) -> Vec<(String, HealthStatus)>;
    fn subscribe(&self) -> mpsc::Receiver<HealthEvent>;
}

pub type HealthResult<T> = Result<T, ProxyError>;
