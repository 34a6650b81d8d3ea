//! CircuitBreaker (§4.6): a per-target Closed/Open/HalfOpen state machine
//! gating whether the proxy even attempts a forward. Per-target records
//! are created under double-checked locking against a map-level mutex;
//! the Open→HalfOpen transition on expiry acquires its target's write
//! lock directly rather than upgrading a read lock, since the teacher's
//! read→write→downgrade path races (noted in the spec as something to
//! fix, not preserve).
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::errors::ProxyError;
use crate::observability::MetricsRecorder;
use crate::ports::CircuitState;

/// Encodes `CircuitState` for the `rwwwrse_circuit_state` gauge (§4.6,
/// SPEC_FULL's ambient-stack metrics): 0=closed, 1=half_open, 2=open.
fn state_code(state: CircuitState) -> u8 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::HalfOpen => 1,
        CircuitState::Open => 2,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
    pub max_half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            max_half_open_requests: 1,
        }
    }
}

struct TargetState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    half_open_inflight: u32,
}

impl TargetState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
            half_open_inflight: 0,
        }
    }
}

/// Per-target circuit state, keyed by backend/target name.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    targets: RwLock<HashMap<String, Arc<Mutex<TargetState>>>>,
    creation_lock: Mutex<()>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            config,
            targets: RwLock::new(HashMap::new()),
            creation_lock: Mutex::new(()),
            metrics,
        }
    }

    fn entry(&self, target: &str) -> Arc<Mutex<TargetState>> {
        if let Some(existing) = self.targets.read().unwrap().get(target) {
            return existing.clone();
        }
        let _guard = self.creation_lock.lock().unwrap();
        // Re-check: another caller may have won the race while we waited.
        if let Some(existing) = self.targets.read().unwrap().get(target) {
            return existing.clone();
        }
        let created = Arc::new(Mutex::new(TargetState::new()));
        self.targets.write().unwrap().insert(target.to_string(), created.clone());
        created
    }

    /// Whether a request to `target` may be attempted right now. Performs
    /// the Open→HalfOpen transition inline when `Timeout` has elapsed.
    pub fn allow(&self, target: &str) -> bool {
        if target.trim().is_empty() {
            return false;
        }
        let entry = self.entry(target);
        let mut state = entry.lock().unwrap();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = state.last_failure_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.config.timeout {
                    state.state = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    state.half_open_inflight = 1;
                    self.metrics.record_circuit_state(target, state_code(CircuitState::HalfOpen));
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_inflight < self.config.max_half_open_requests {
                    state.half_open_inflight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, target: &str) {
        if target.trim().is_empty() {
            return;
        }
        let entry = self.entry(target);
        let mut state = entry.lock().unwrap();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
                state.consecutive_successes += 1;
                if state.consecutive_successes >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.consecutive_successes = 0;
                    state.last_failure_at = None;
                    self.metrics.record_circuit_state(target, state_code(CircuitState::Closed));
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, target: &str) {
        if target.trim().is_empty() {
            return;
        }
        let entry = self.entry(target);
        let mut state = entry.lock().unwrap();
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                state.last_failure_at = Some(Instant::now());
                if state.consecutive_failures >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    self.metrics.record_circuit_state(target, state_code(CircuitState::Open));
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_inflight = state.half_open_inflight.saturating_sub(1);
                state.state = CircuitState::Open;
                state.consecutive_successes = 0;
                state.consecutive_failures = self.config.failure_threshold;
                state.last_failure_at = Some(Instant::now());
                self.metrics.record_circuit_state(target, state_code(CircuitState::Open));
            }
            CircuitState::Open => {
                state.last_failure_at = Some(Instant::now());
            }
        }
    }

    pub fn state(&self, target: &str) -> CircuitState {
        let entry = self.entry(target);
        let state = entry.lock().unwrap();
        state.state
    }

    pub fn reset(&self, target: &str) -> Result<(), ProxyError> {
        if target.trim().is_empty() {
            return Err(ProxyError::request_invalid("circuit breaker target must not be empty"));
        }
        let entry = self.entry(target);
        let mut state = entry.lock().unwrap();
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.last_failure_at = None;
        state.half_open_inflight = 0;
        self.metrics.record_circuit_state(target, state_code(CircuitState::Closed));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 3,
                success_threshold: 2,
                timeout: Duration::from_millis(200),
                max_half_open_requests: 1,
            },
            Arc::new(crate::observability::PrometheusRecorder),
        )
    }

    #[test]
    fn empty_target_rejected() {
        let cb = breaker();
        assert!(!cb.allow(""));
        assert!(cb.reset("").is_err());
    }

    #[test]
    fn opens_after_failure_threshold() {
        let cb = breaker();
        assert!(cb.allow("api"));
        cb.record_failure("api");
        cb.record_failure("api");
        assert_eq!(cb.state("api"), CircuitState::Closed);
        cb.record_failure("api");
        assert_eq!(cb.state("api"), CircuitState::Open);
        assert!(!cb.allow("api"));
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure("api");
        }
        assert_eq!(cb.state("api"), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(250));
        assert!(cb.allow("api"));
        assert_eq!(cb.state("api"), CircuitState::HalfOpen);
        cb.record_success("api");
        cb.record_success("api");
        assert_eq!(cb.state("api"), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure("api");
        }
        std::thread::sleep(Duration::from_millis(250));
        assert!(cb.allow("api"));
        cb.record_failure("api");
        assert_eq!(cb.state("api"), CircuitState::Open);
    }

    #[test]
    fn reset_forces_closed() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure("api");
        }
        assert_eq!(cb.state("api"), CircuitState::Open);
        cb.reset("api").unwrap();
        assert_eq!(cb.state("api"), CircuitState::Closed);
        assert!(cb.allow("api"));
    }

    #[test]
    fn independent_targets_do_not_interfere() {
        let cb = breaker();
        for _ in 0..3 {
            cb.record_failure("a");
        }
        assert_eq!(cb.state("a"), CircuitState::Open);
        assert_eq!(cb.state("b"), CircuitState::Closed);
        assert!(cb.allow("b"));
    }

    #[derive(Default)]
    struct RecordingRecorder {
        states: Mutex<Vec<(String, u8)>>,
    }

    impl MetricsRecorder for RecordingRecorder {
        fn record_request(&self, _method: &str, _path: &str, _status: u16, _duration: Duration) {}
        fn record_backend_request(&self, _backend: &str, _status: u16, _duration: Duration) {}
        fn record_backend_health(&self, _backend: &str, _healthy: bool) {}
        fn record_circuit_state(&self, target: &str, state: u8) {
            self.states.lock().unwrap().push((target.to_string(), state));
        }
        fn record_check(&self, _target: &str, _success: bool, _duration: Duration) {}
        fn active_connections_inc(&self) {}
        fn active_connections_dec(&self) {}
    }

    #[test]
    fn emits_circuit_state_metric_on_every_transition() {
        let recorder = Arc::new(RecordingRecorder::default());
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                timeout: Duration::from_millis(50),
                max_half_open_requests: 1,
            },
            recorder.clone(),
        );

        cb.record_failure("api");
        cb.record_failure("api");
        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.allow("api"));
        cb.record_success("api");

        let states = recorder.states.lock().unwrap().clone();
        assert_eq!(states, vec![
            ("api".to_string(), 2),
            ("api".to_string(), 1),
            ("api".to_string(), 0),
        ]);
    }
}
