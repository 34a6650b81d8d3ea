//! Application (§3/§9): the composite aggregate wiring every component
//! together from a validated `AppConfig`, plus the running flag guarded by
//! a reader-writer lock that the spec calls for. `new` performs all
//! construction-time wiring (panicking only on dependency wiring that
//! cannot fail at runtime, per §7); `start`/`stop` are the idempotent
//! lifecycle transitions.
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{Notify, RwLock as AsyncRwLock};
use tokio::time::interval as tick_every;

use crate::adapters::tls::{AcmeConfig, AcmeTlsManager, HttpChallengeStore, SimpleTlsManager};
use crate::adapters::{FileCertStorage, HttpServer, HttpsServer, PeriodicHealthChecker};
use crate::config::AppConfig;
use crate::core::health::{HealthAggregator, Reporter};
use crate::core::{BackendManager, CircuitBreaker, CircuitBreakerConfig, ConnectionPool, HostRouter, ProxyHandler, RequestRateLimiter};
use crate::errors::ProxyError;
use crate::observability::{install_exporter, Logger, MetricsRecorder, PrometheusRecorder, TracingLogger};
use crate::ports::health::{HealthChecker, HealthTarget};
use crate::ports::tls::TlsManager;
use crate::server::ServerManager;

pub struct Application {
    config: AppConfig,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsRecorder>,
    backend_manager: Arc<BackendManager>,
    router: Arc<HostRouter>,
    proxy: Arc<ProxyHandler>,
    health_checker: Arc<PeriodicHealthChecker>,
    reporter: Arc<Reporter>,
    tls_manager: Option<Arc<dyn TlsManager>>,
    challenge_store: Option<Arc<HttpChallengeStore>>,
    // tokio's RwLock, not std's: the write guard is held across
    // `ServerManager::stop_all`'s internal `.await`s.
    servers: AsyncRwLock<ServerManager>,
    tls_maintenance_stop: Arc<Notify>,
    running: RwLock<bool>,
}

impl Application {
    /// Wires every component from `config`. Registers each configured route
    /// as a Backend, a router entry, and (when health checking is enabled)
    /// a health target; installs a TLS manager when `tls.enabled`.
    pub fn new(config: AppConfig) -> Result<Self, ProxyError> {
        install_exporter();
        let logger: Arc<dyn Logger> = Arc::new(TracingLogger);
        let metrics: Arc<dyn MetricsRecorder> = Arc::new(PrometheusRecorder);

        let backend_manager = Arc::new(BackendManager::new());
        let router = Arc::new(HostRouter::new(logger.clone()));
        let circuit_breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default(), metrics.clone()));
        let pool = Arc::new(ConnectionPool::new());
        let health_checker = Arc::new(PeriodicHealthChecker::new(
            config.health.interval(),
            config.health.unhealthy_threshold,
            config.health.healthy_threshold,
            backend_manager.clone(),
            logger.clone(),
            metrics.clone(),
        ));

        for (host, route) in &config.backends.routes {
            let backend = backend_manager.add(host.clone(), route.clone())?;
            router.register(host.clone(), backend.clone());
            if config.health.enabled {
                let health_path = if route.health_path.is_empty() { config.health.path.clone() } else { route.health_path.clone() };
                health_checker.register_target(HealthTarget {
                    name: host.clone(),
                    url: format!("{}{}", backend.url().as_str().trim_end_matches('/'), health_path),
                    timeout: config.health.timeout(),
                    expected_status: 200,
                    headers: Vec::new(),
                });
            }
        }

        let rate_limiter = if config.ratelimit.enabled {
            Some(Arc::new(RequestRateLimiter::new(&config.ratelimit)?))
        } else {
            None
        };
        let rate_limit_header = config
            .ratelimit
            .header_name
            .as_deref()
            .and_then(|name| http::HeaderName::from_bytes(name.as_bytes()).ok());

        let mut proxy = ProxyHandler::new(router.clone(), circuit_breaker.clone(), pool.clone(), logger.clone(), metrics.clone());
        if let Some(limiter) = rate_limiter {
            proxy = proxy.with_rate_limiter(limiter, rate_limit_header);
        }
        let proxy = Arc::new(proxy);

        let (tls_manager, challenge_store): (Option<Arc<dyn TlsManager>>, Option<Arc<HttpChallengeStore>>) = if config.tls.enabled {
            if config.tls.auto_cert {
                let challenge_store = Arc::new(HttpChallengeStore::new());
                let cert_storage = Arc::new(FileCertStorage::new(config.tls.cache_dir.clone()));
                let manager = AcmeTlsManager::new(
                    AcmeConfig {
                        email: config.tls.email.clone(),
                        staging: config.tls.staging,
                        renew_before_days: config.tls.renew_before_days,
                        min_version: config.tls.min_version,
                    },
                    challenge_store.clone(),
                    cert_storage,
                    logger.clone(),
                );
                for domain in &config.tls.domains {
                    manager.add_domain(domain)?;
                }
                let manager: Arc<dyn TlsManager> = manager;
                (Some(manager), Some(challenge_store))
            } else {
                let manager = Arc::new(SimpleTlsManager::new(config.tls.min_version));
                for domain in &config.tls.domains {
                    manager.add_domain(domain)?;
                }
                let manager: Arc<dyn TlsManager> = manager;
                (Some(manager), None)
            }
        } else {
            (None, None)
        };

        let reporter = Arc::new(Reporter::new(HealthAggregator::new(health_checker.clone()), env!("CARGO_PKG_VERSION")));

        Ok(Self {
            config,
            logger,
            metrics,
            backend_manager,
            router,
            proxy,
            health_checker,
            reporter,
            tls_manager,
            challenge_store,
            servers: AsyncRwLock::new(ServerManager::new(Arc::new(TracingLogger))),
            tls_maintenance_stop: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    pub fn backend_manager(&self) -> &Arc<BackendManager> {
        &self.backend_manager
    }

    pub fn router(&self) -> &Arc<HostRouter> {
        &self.router
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Idempotent: rejects re-entry while already running, per §3's
    /// Application invariant. Starts health monitoring, the TLS manager
    /// (and its hourly renewal-scan ticker, orchestrated here since
    /// `TlsManager` itself is a synchronous trait object), and the
    /// HTTP/HTTPS listeners.
    pub async fn start(&self) -> Result<(), ProxyError> {
        {
            let mut running = self.running.write().unwrap();
            if *running {
                return Err(ProxyError::internal_error("application already running"));
            }
            *running = true;
        }

        if self.config.health.enabled {
            self.health_checker.start().await?;
        }

        if let Some(tls_manager) = &self.tls_manager {
            tls_manager.start()?;
            self.spawn_tls_maintenance(tls_manager.clone());
        }

        let host = self.config.server.host.as_str();
        let http_addr: SocketAddr = format!("{host}:{}", self.config.server.port)
            .parse()
            .map_err(|err| ProxyError::config_invalid("invalid server.host/port").with_cause(err))?;

        let mut listeners: Vec<Arc<dyn crate::ports::server::ManagedServer>> = vec![Arc::new(HttpServer::new(
            "http",
            http_addr,
            self.proxy.clone(),
            self.challenge_store.clone(),
            Some(self.reporter.clone()),
            self.config.server.graceful_timeout(),
        ))];

        if let Some(tls_manager) = &self.tls_manager {
            let https_addr: SocketAddr = format!("{host}:{}", self.config.server.https_port)
                .parse()
                .map_err(|err| ProxyError::config_invalid("invalid server.host/https_port").with_cause(err))?;
            let https_server = HttpsServer::new(
                "https",
                https_addr,
                self.proxy.clone(),
                self.challenge_store.clone(),
                Some(self.reporter.clone()),
                tls_manager.as_ref(),
                self.config.server.graceful_timeout(),
            )
            .map_err(|err| ProxyError::tls_handshake("failed to start https listener").with_cause(err))?;
            listeners.push(Arc::new(https_server));
        }

        self.servers.write().await.start_all(listeners)?;
        self.logger.info("application started", &[("host", host)]);
        Ok(())
    }

    fn spawn_tls_maintenance(&self, tls_manager: Arc<dyn TlsManager>) {
        let stop = self.tls_maintenance_stop.clone();
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let mut ticker = tick_every(Duration::from_secs(3600));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = tls_manager.renew_certificates() {
                            logger.warn("tls maintenance scan failed", &[("error", &err.to_string())]);
                        }
                    }
                    _ = stop.notified() => break,
                }
            }
        });
    }

    /// No-op if not running. Stops listeners first (draining in-flight
    /// requests), then the TLS maintenance ticker, the TLS manager, and
    /// health monitoring.
    pub async fn stop(&self) {
        {
            let mut running = self.running.write().unwrap();
            if !*running {
                return;
            }
            *running = false;
        }

        self.servers.write().await.stop_all().await;

        self.tls_maintenance_stop.notify_one();
        if let Some(tls_manager) = &self.tls_manager {
            let _ = tls_manager.stop();
        }

        self.health_checker.stop();
        self.logger.info("application stopped", &[]);
    }

    pub fn is_healthy(&self) -> bool {
        *self.running.read().unwrap() && self.servers.try_read().map(|servers| servers.is_healthy()).unwrap_or(false)
    }
}
