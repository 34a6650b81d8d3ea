//! Metrics recorder contract and its Prometheus-backed implementation.
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const RWWWRSE_REQUESTS_TOTAL: &str = "rwwwrse_requests_total";
pub const RWWWRSE_REQUEST_DURATION_SECONDS: &str = "rwwwrse_request_duration_seconds";
pub const RWWWRSE_BACKEND_REQUESTS_TOTAL: &str = "rwwwrse_backend_requests_total";
pub const RWWWRSE_BACKEND_REQUEST_DURATION_SECONDS: &str =
    "rwwwrse_backend_request_duration_seconds";
pub const RWWWRSE_BACKEND_HEALTH_STATUS: &str = "rwwwrse_backend_health_status";
pub const RWWWRSE_CIRCUIT_STATE: &str = "rwwwrse_circuit_state";
pub const RWWWRSE_HEALTH_CHECK_TOTAL: &str = "rwwwrse_health_check_total";
pub const RWWWRSE_HEALTH_CHECK_DURATION_SECONDS: &str = "rwwwrse_health_check_duration_seconds";
pub const RWWWRSE_ACTIVE_CONNECTIONS: &str = "rwwwrse_active_connections";

static EXPORTER: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the global Prometheus recorder exactly once. Safe to call
/// repeatedly (e.g. in tests); later calls are no-ops and return the handle
/// installed by the first caller.
pub fn install_exporter() -> PrometheusHandle {
    EXPORTER
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install prometheus recorder");
            describe_metrics();
            handle
        })
        .clone()
}

/// Renders the current Prometheus exposition text for `GET /metrics`.
/// Panics if called before [`install_exporter`] — the server adapter
/// always installs the exporter during `Application` construction.
pub fn render() -> String {
    EXPORTER.get().expect("prometheus exporter not installed").render()
}

fn describe_metrics() {
    describe_counter!(RWWWRSE_REQUESTS_TOTAL, Unit::Count, "Total HTTP requests handled.");
    describe_histogram!(
        RWWWRSE_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests handled by the proxy."
    );
    describe_counter!(
        RWWWRSE_BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Total requests forwarded to backends."
    );
    describe_histogram!(
        RWWWRSE_BACKEND_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of requests forwarded to backends."
    );
    describe_gauge!(
        RWWWRSE_BACKEND_HEALTH_STATUS,
        "Backend health status, 1 for healthy and 0 for unhealthy."
    );
    describe_gauge!(RWWWRSE_CIRCUIT_STATE, "Circuit breaker state per target (0=closed, 1=half_open, 2=open).");
    describe_counter!(RWWWRSE_HEALTH_CHECK_TOTAL, Unit::Count, "Total health probes performed.");
    describe_histogram!(
        RWWWRSE_HEALTH_CHECK_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of individual health probes."
    );
    describe_gauge!(RWWWRSE_ACTIVE_CONNECTIONS, "Requests currently in flight.");
}

/// `MetricsRecorder` is the port the core depends on to emit measurements.
/// Kept narrow and call-shaped (rather than exposing raw histograms) so
/// core code never touches the `metrics` crate's macros directly.
pub trait MetricsRecorder: Send + Sync + 'static {
    fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration);
    fn record_backend_request(&self, backend: &str, status: u16, duration: Duration);
    fn record_backend_health(&self, backend: &str, healthy: bool);
    fn record_circuit_state(&self, target: &str, state: u8);
    fn record_check(&self, target: &str, success: bool, duration: Duration);
    fn active_connections_inc(&self);
    fn active_connections_dec(&self);
}

/// The production recorder, backed by the global `metrics` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusRecorder;

impl MetricsRecorder for PrometheusRecorder {
    fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        counter!(
            RWWWRSE_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status.to_string(),
        )
        .increment(1);
        histogram!(
            RWWWRSE_REQUEST_DURATION_SECONDS,
            "method" => method.to_string(),
            "path" => path.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    fn record_backend_request(&self, backend: &str, status: u16, duration: Duration) {
        counter!(
            RWWWRSE_BACKEND_REQUESTS_TOTAL,
            "backend" => backend.to_string(),
            "status" => status.to_string(),
        )
        .increment(1);
        histogram!(
            RWWWRSE_BACKEND_REQUEST_DURATION_SECONDS,
            "backend" => backend.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    fn record_backend_health(&self, backend: &str, healthy: bool) {
        gauge!(RWWWRSE_BACKEND_HEALTH_STATUS, "backend" => backend.to_string())
            .set(if healthy { 1.0 } else { 0.0 });
    }

    fn record_circuit_state(&self, target: &str, state: u8) {
        gauge!(RWWWRSE_CIRCUIT_STATE, "target" => target.to_string()).set(state as f64);
    }

    fn record_check(&self, target: &str, success: bool, duration: Duration) {
        counter!(
            RWWWRSE_HEALTH_CHECK_TOTAL,
            "target" => target.to_string(),
            "success" => success.to_string(),
        )
        .increment(1);
        histogram!(RWWWRSE_HEALTH_CHECK_DURATION_SECONDS, "target" => target.to_string())
            .record(duration.as_secs_f64());
    }

    fn active_connections_inc(&self) {
        gauge!(RWWWRSE_ACTIVE_CONNECTIONS).increment(1.0);
    }

    fn active_connections_dec(&self) {
        gauge!(RWWWRSE_ACTIVE_CONNECTIONS).decrement(1.0);
    }
}

/// RAII guard recording a request's total duration on drop, mirroring the
/// timer-on-drop idiom used for backend-request timing elsewhere. Bumps the
/// active-connections gauge on construction and decrements it on drop so
/// `ProxyHandler::handle` can't forget to balance the two.
pub struct RequestTimer<'a> {
    recorder: &'a dyn MetricsRecorder,
    method: String,
    path: String,
    status: u16,
    start: std::time::Instant,
}

impl<'a> RequestTimer<'a> {
    pub fn new(recorder: &'a dyn MetricsRecorder, method: String, path: String) -> Self {
        recorder.active_connections_inc();
        Self {
            recorder,
            method,
            path,
            status: 0,
            start: std::time::Instant::now(),
        }
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }
}

impl<'a> Drop for RequestTimer<'a> {
    fn drop(&mut self) {
        self.recorder.active_connections_dec();
        self.recorder
            .record_request(&self.method, &self.path, self.status, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingRecorder {
        active: AtomicUsize,
        recorded_status: AtomicU16,
    }

    impl MetricsRecorder for RecordingRecorder {
        fn record_request(&self, _method: &str, _path: &str, status: u16, _duration: Duration) {
            self.recorded_status.store(status, Ordering::SeqCst);
        }
        fn record_backend_request(&self, _backend: &str, _status: u16, _duration: Duration) {}
        fn record_backend_health(&self, _backend: &str, _healthy: bool) {}
        fn record_circuit_state(&self, _target: &str, _state: u8) {}
        fn record_check(&self, _target: &str, _success: bool, _duration: Duration) {}
        fn active_connections_inc(&self) {
            self.active.fetch_add(1, Ordering::SeqCst);
        }
        fn active_connections_dec(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn request_timer_balances_active_connections_and_records_status() {
        let recorder = RecordingRecorder::default();
        {
            let mut timer = RequestTimer::new(&recorder, "GET".to_string(), "/x".to_string());
            assert_eq!(recorder.active.load(Ordering::SeqCst), 1);
            timer.set_status(204);
        }
        assert_eq!(recorder.active.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.recorded_status.load(Ordering::SeqCst), 204);
    }
}
