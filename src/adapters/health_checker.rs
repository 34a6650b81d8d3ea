//! Periodic health-probing adapter (§4.5), grounded on the teacher's
//! `adapters/health_checker.rs` polling loop but rebuilt around the
//! registered-target/event-subscription shape the port actually
//! specifies, rather than iterating `ProxyService`'s backend map
//! directly. Liveness transitions are pushed straight into
//! `core::backend::BackendManager` so the router sees them immediately.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use http::Request;
use http_body_util::Empty;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::sync::{mpsc, Notify};
use tokio::time::{interval as tick_every, timeout};

use crate::core::backend::BackendManager;
use crate::errors::ProxyError;
use crate::observability::{Logger, MetricsRecorder};
use crate::ports::health::{HealthChecker, HealthEvent, HealthEventType, HealthSnapshot, HealthStatus, HealthTarget};

type ProbeClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

fn build_probe_client() -> ProbeClient {
    let http = HttpConnector::new();
    let https: HttpsConnector<HttpConnector> = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .expect("native root certificates must load")
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);
    Client::builder(TokioExecutor::new()).build(https)
}

struct TargetRecord {
    target: HealthTarget,
    status: Mutex<HealthStatus>,
}

pub struct PeriodicHealthChecker {
    targets: DashMap<String, Arc<TargetRecord>>,
    subscribers: Mutex<Vec<mpsc::Sender<HealthEvent>>>,
    running: AtomicBool,
    stop: Arc<Notify>,
    client: ProbeClient,
    interval: Duration,
    unhealthy_threshold: u32,
    healthy_threshold: u32,
    backend_manager: Arc<BackendManager>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl PeriodicHealthChecker {
    pub fn new(
        interval: Duration,
        unhealthy_threshold: u32,
        healthy_threshold: u32,
        backend_manager: Arc<BackendManager>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            targets: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            stop: Arc::new(Notify::new()),
            client: build_probe_client(),
            interval,
            unhealthy_threshold,
            healthy_threshold: healthy_threshold.max(1),
            backend_manager,
            logger,
            metrics,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// StartMonitoring (§4.5): fails if already running. Callers gate on
    /// `HealthConfig::enabled` before invoking this at all, so "disabled"
    /// is a no-op at the call site rather than a branch in here.
    pub async fn start(self: &Arc<Self>) -> Result<(), ProxyError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ProxyError::internal_error("health checker already running"));
        }
        self.emit(HealthEventType::Started, "*", HealthSnapshot { healthy: true }, None);
        self.run_pass().await;

        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tick_every(this.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => this.run_pass().await,
                    _ = this.stop.notified() => break,
                }
            }
        });
        Ok(())
    }

    /// StopMonitoring: idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.stop.notify_one();
            self.emit(HealthEventType::Stopped, "*", HealthSnapshot { healthy: false }, None);
        }
    }

    async fn run_pass(&self) {
        let targets: Vec<_> = self.targets.iter().map(|entry| entry.value().clone()).collect();
        for record in targets {
            self.check_one(&record).await;
        }
    }

    async fn check_one(&self, record: &Arc<TargetRecord>) {
        let start = Instant::now();
        let probe_healthy = self.probe(&record.target).await;
        let duration = start.elapsed();
        self.metrics.record_check(&record.target.name, probe_healthy, duration);
        if probe_healthy {
            self.logger.debug("health check passed", &[("target", &record.target.name)]);
        } else {
            self.logger.warn("health check failed", &[("target", &record.target.name)]);
        }

        let (consecutive_failures, consecutive_successes, previous_failures) = {
            let mut status = record.status.lock().unwrap();
            let previous_healthy = status.healthy;
            let previous_failures = status.consecutive_failures;

            match (previous_healthy, probe_healthy) {
                (true, true) => {
                    status.consecutive_successes += 1;
                    status.consecutive_failures = 0;
                }
                (true, false) => {
                    status.consecutive_failures = 1;
                    status.consecutive_successes = 0;
                }
                (false, false) => {
                    status.consecutive_failures += 1;
                    status.consecutive_successes = 0;
                }
                (false, true) => {
                    status.consecutive_successes = 1;
                    status.consecutive_failures = 0;
                }
            }
            status.healthy = probe_healthy;
            status.last_check = std::time::SystemTime::now();
            status.response_time = duration;
            (status.consecutive_failures, status.consecutive_successes, previous_failures)
        };

        if !probe_healthy && consecutive_failures > 0 && consecutive_failures < self.unhealthy_threshold && previous_failures == 0 {
            let snapshot = HealthSnapshot { healthy: false };
            self.emit(HealthEventType::Degraded, &record.target.name, snapshot, Some(HealthSnapshot { healthy: true }));
        }

        // Backend liveness (what `Router`/`ProxyHandler` actually gate on) is
        // threshold-gated, independent of the raw per-probe status above: a
        // single flaky probe must not flip routing, and recovery requires
        // `healthy_threshold` consecutive successes (spec.md §8 scenario 3).
        let target_healthy = if !probe_healthy && consecutive_failures >= self.unhealthy_threshold {
            Some(false)
        } else if probe_healthy && consecutive_successes >= self.healthy_threshold {
            Some(true)
        } else {
            None
        };

        if let (Some(target_healthy), Ok(backend)) = (target_healthy, self.backend_manager.get(&record.target.name)) {
            let previous_backend_healthy = backend.is_healthy();
            let changed = backend.set_healthy(target_healthy, self.logger.as_ref(), self.metrics.as_ref());
            if changed {
                let old_snapshot = HealthSnapshot { healthy: previous_backend_healthy };
                let new_snapshot = HealthSnapshot { healthy: target_healthy };
                self.emit(
                    if target_healthy { HealthEventType::Passed } else { HealthEventType::Failed },
                    &record.target.name,
                    new_snapshot,
                    Some(old_snapshot),
                );
                if target_healthy {
                    self.emit(HealthEventType::Recovered, &record.target.name, new_snapshot, Some(old_snapshot));
                }
            }
        }
    }

    async fn probe(&self, target: &HealthTarget) -> bool {
        self.probe_detailed(target).await.0
    }

    /// Runs the GET against `target.url`, applying its headers and timeout,
    /// and reports whether the response matched `expected_status` alongside
    /// the status code observed (if any) and an error description on
    /// failure. Shared by the periodic loop's `probe` and the on-demand
    /// `check`.
    async fn probe_detailed(&self, target: &HealthTarget) -> (bool, Option<u16>, Option<String>) {
        let mut builder = Request::builder().method(http::Method::GET).uri(&target.url);
        for (name, value) in &target.headers {
            builder = builder.header(name, value);
        }
        let request = match builder.body(Empty::<Bytes>::new()) {
            Ok(request) => request,
            Err(err) => return (false, None, Some(err.to_string())),
        };
        match timeout(target.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let code = response.status().as_u16();
                (code == target.expected_status, Some(code), None)
            }
            Ok(Err(err)) => (false, None, Some(err.to_string())),
            Err(_) => (false, None, Some("health probe timed out".to_string())),
        }
    }

    /// Check (§4.5): a one-shot probe of `target`, independent of the
    /// periodic monitoring loop's stored per-target record and consecutive
    /// counters — those accrue only for targets registered via
    /// `register_target` and polled by `start`'s ticker.
    pub async fn check(&self, target: &HealthTarget) -> HealthStatus {
        let start = Instant::now();
        let (healthy, status_code, error) = self.probe_detailed(target).await;
        let duration = start.elapsed();
        self.metrics.record_check(&target.name, healthy, duration);
        if healthy {
            self.logger.debug("health check passed", &[("target", &target.name)]);
        } else {
            self.logger.warn("health check failed", &[("target", &target.name)]);
        }
        HealthStatus {
            healthy,
            last_check: std::time::SystemTime::now(),
            response_time: duration,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_status_code: status_code,
            error,
        }
    }

    fn emit(&self, event_type: HealthEventType, target_name: &str, new: HealthSnapshot, old: Option<HealthSnapshot>) {
        let event = HealthEvent {
            target_name: target_name.to_string(),
            old,
            new,
            timestamp: std::time::SystemTime::now(),
            event_type,
        };
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.logger.warn("health event subscriber channel full, dropping event", &[("target", target_name)]);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.logger.warn("health event subscriber channel closed, removing subscriber", &[("target", target_name)]);
                false
            }
        });
    }
}

impl HealthChecker for PeriodicHealthChecker {
    fn register_target(&self, target: HealthTarget) {
        let name = target.name.clone();
        self.targets
            .insert(name, Arc::new(TargetRecord { target, status: Mutex::new(HealthStatus::initial()) }));
    }

    fn unregister_target(&self, name: &str) {
        self.targets.remove(name);
    }

    fn get_target_status(&self, name: &str) -> Option<HealthStatus> {
        self.targets.get(name).map(|record| record.status.lock().unwrap().clone())
    }

    fn get_all_target_status(&self) -> Vec<(String, HealthStatus)> {
        self.targets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status.lock().unwrap().clone()))
            .collect()
    }

    fn subscribe(&self) -> mpsc::Receiver<HealthEvent> {
        let (tx, rx) = mpsc::channel(32);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::observability::{PrometheusRecorder, TracingLogger};

    fn checker_with(backend_manager: Arc<BackendManager>, unhealthy_threshold: u32, healthy_threshold: u32) -> Arc<PeriodicHealthChecker> {
        Arc::new(PeriodicHealthChecker::new(
            Duration::from_millis(50),
            unhealthy_threshold,
            healthy_threshold,
            backend_manager,
            Arc::new(TracingLogger),
            Arc::new(PrometheusRecorder),
        ))
    }

    fn checker() -> Arc<PeriodicHealthChecker> {
        checker_with(Arc::new(BackendManager::new()), 3, 2)
    }

    #[test]
    fn register_and_unregister_target() {
        let checker = checker();
        checker.register_target(HealthTarget {
            name: "api".to_string(),
            url: "http://127.0.0.1:1/health".to_string(),
            timeout: Duration::from_millis(50),
            expected_status: 200,
            headers: vec![],
        });
        assert!(checker.get_target_status("api").is_some());
        checker.unregister_target("api");
        assert!(checker.get_target_status("api").is_none());
    }

    #[tokio::test]
    async fn failing_probe_marks_unhealthy_after_transition() {
        let checker = checker();
        checker.register_target(HealthTarget {
            name: "api".to_string(),
            url: "http://127.0.0.1:1/health".to_string(),
            timeout: Duration::from_millis(20),
            expected_status: 200,
            headers: vec![],
        });
        let record = checker.targets.get("api").unwrap().value().clone();
        checker.check_one(&record).await;
        let status = checker.get_target_status("api").unwrap();
        assert!(!status.healthy);
        assert_eq!(status.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn start_rejects_second_call() {
        let checker = checker();
        checker.start().await.unwrap();
        assert!(checker.start().await.is_err());
        checker.stop();
    }

    #[tokio::test]
    async fn backend_liveness_requires_unhealthy_threshold_consecutive_failures() {
        let backend_manager = Arc::new(BackendManager::new());
        let backend = backend_manager
            .add("api".to_string(), RouteConfig { url: "http://127.0.0.1:1".to_string(), ..RouteConfig::default() })
            .unwrap();
        assert!(backend.is_healthy());

        let checker = checker_with(backend_manager, 2, 2);
        checker.register_target(HealthTarget {
            name: "api".to_string(),
            url: "http://127.0.0.1:1/health".to_string(),
            timeout: Duration::from_millis(20),
            expected_status: 200,
            headers: vec![],
        });
        let record = checker.targets.get("api").unwrap().value().clone();

        checker.check_one(&record).await;
        assert!(backend.is_healthy(), "a single failed probe must not flip routing liveness");

        checker.check_one(&record).await;
        assert!(!backend.is_healthy(), "two consecutive failed probes must cross unhealthy_threshold");
    }

    /// Binds an ephemeral listener that answers every connection with a
    /// bare `200 OK` and keeps serving until the test drops the returned
    /// `JoinHandle`.
    async fn spawn_ok_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        use tokio::io::AsyncWriteExt;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let _ = socket.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
                });
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn backend_liveness_requires_healthy_threshold_consecutive_successes() {
        let (addr, _server) = spawn_ok_server().await;

        let backend_manager = Arc::new(BackendManager::new());
        let backend = backend_manager
            .add("api".to_string(), RouteConfig { url: format!("http://{addr}"), ..RouteConfig::default() })
            .unwrap();
        backend.set_healthy(false, &TracingLogger, &PrometheusRecorder);
        assert!(!backend.is_healthy());

        let checker = checker_with(backend_manager, 2, 2);
        checker.register_target(HealthTarget {
            name: "api".to_string(),
            url: format!("http://{addr}/health"),
            timeout: Duration::from_millis(200),
            expected_status: 200,
            headers: vec![],
        });
        let record = checker.targets.get("api").unwrap().value().clone();

        checker.check_one(&record).await;
        assert!(!backend.is_healthy(), "a single successful probe must not yet clear routing liveness");

        checker.check_one(&record).await;
        assert!(backend.is_healthy(), "two consecutive successful probes must cross healthy_threshold");
    }

    #[tokio::test]
    async fn check_reports_status_for_a_passing_probe() {
        let (addr, _server) = spawn_ok_server().await;
        let checker = checker();
        let target = HealthTarget {
            name: "api".to_string(),
            url: format!("http://{addr}/health"),
            timeout: Duration::from_millis(200),
            expected_status: 200,
            headers: vec![],
        };

        let status = checker.check(&target).await;
        assert!(status.healthy);
        assert_eq!(status.last_status_code, Some(200));
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn check_reports_status_for_a_failing_probe() {
        let checker = checker();
        let target = HealthTarget {
            name: "api".to_string(),
            url: "http://127.0.0.1:1/health".to_string(),
            timeout: Duration::from_millis(20),
            expected_status: 200,
            headers: vec![],
        };

        let status = checker.check(&target).await;
        assert!(!status.healthy);
        assert_eq!(status.last_status_code, None);
        assert!(status.error.is_some());
    }
}
