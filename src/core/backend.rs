//! Backend and BackendManager (§4.1). A Backend owns a target URL, a
//! shared HTTP transport with pooled connections, and an atomically
//! updated liveness bit; it is created from route configuration and
//! mutated only by the health checker (liveness) or an admin add/remove.
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::RouteConfig;
use crate::errors::ProxyError;
use crate::observability::{Logger, MetricsRecorder};

const HEALTHY: u8 = 1;
const UNHEALTHY: u8 = 0;

/// A boxed body error, so the server adapter can forward axum's own body
/// error type without this core module knowing axum exists.
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;
pub type Body = http_body_util::combinators::BoxBody<bytes::Bytes, BodyError>;
pub type Transport = Client<HttpsConnector<HttpConnector>, Body>;

/// A type-safe wrapper validating the backend's target URL has a scheme
/// and a host, per the Backend invariant in §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendUrl {
    url: String,
    scheme: String,
    host: String,
}

impl BackendUrl {
    pub fn new(raw: &str) -> Result<Self, ProxyError> {
        let parsed = url::Url::parse(raw)
            .map_err(|err| ProxyError::config_invalid(format!("invalid backend url: {raw}")).with_cause(err))?;
        let scheme = parsed.scheme().to_string();
        if scheme != "http" && scheme != "https" {
            return Err(ProxyError::config_invalid(format!(
                "backend url must use http or https, got '{scheme}'"
            )));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::config_invalid(format!("backend url has no host: {raw}")))?
            .to_string();
        Ok(Self { url: raw.to_string(), scheme, host })
    }

    pub fn as_str(&self) -> &str {
        &self.url
    }
    pub fn is_secure(&self) -> bool {
        self.scheme == "https"
    }
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl FromStr for BackendUrl {
    type Err = ProxyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendUrl::new(s)
    }
}

impl std::fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// A named upstream with a dedicated transport and atomic liveness bit.
/// The transport is owned exclusively by the Backend; `Close` (via `Drop`
/// semantics of the underlying hyper client) releases idle connections.
pub struct Backend {
    name: String,
    url: BackendUrl,
    route: RouteConfig,
    transport: Transport,
    healthy: AtomicU8,
}

impl Backend {
    pub fn new(name: impl Into<String>, route: RouteConfig) -> Result<Self, ProxyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProxyError::config_invalid("backend name must not be empty"));
        }
        let url = BackendUrl::new(&route.url)?;
        let transport = build_transport(&route);
        Ok(Self {
            name,
            url,
            route,
            transport,
            healthy: AtomicU8::new(HEALTHY),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &BackendUrl {
        &self.url
    }

    pub fn route(&self) -> &RouteConfig {
        &self.route
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire) == HEALTHY
    }

    /// Atomically swaps liveness, returning whether it actually changed so
    /// callers can emit a transition log/metric exactly once.
    pub fn set_healthy(&self, healthy: bool, logger: &dyn Logger, metrics: &dyn MetricsRecorder) -> bool {
        let new_value = if healthy { HEALTHY } else { UNHEALTHY };
        let previous = self.healthy.swap(new_value, Ordering::AcqRel);
        let changed = previous != new_value;
        if changed {
            let fields = [("backend", self.name.as_str())];
            if healthy {
                logger.info("backend transitioned to healthy", &fields);
            } else {
                logger.warn("backend transitioned to unhealthy", &fields);
            }
            metrics.record_backend_health(&self.name, healthy);
        }
        changed
    }

    /// Closes idle connections. Safe to call after the backend has been
    /// removed from the router; subsequent requests simply fail to find it.
    pub fn close(&self) {
        // hyper-util's legacy client has no explicit close; idle
        // connections time out via pool_idle_timeout. Dropping the last
        // Arc<Backend> drops the client, which drops the pool.
    }
}

fn build_transport(route: &RouteConfig) -> Transport {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(route.dial_timeout()));
    http.set_keepalive(Some(Duration::from_secs(30)));
    http.enforce_http(false);

    let https: HttpsConnector<HttpConnector> = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .expect("native root certificates must load")
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(route.max_idle_per_host)
        .build(https)
}

/// Owns the host → Backend mapping at the administration layer: Add,
/// Remove, Update, Get, List, serialized by an internal concurrent map.
pub struct BackendManager {
    backends: DashMap<String, Arc<Backend>>,
    locks: Mutex<()>,
}

impl Default for BackendManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendManager {
    pub fn new() -> Self {
        Self {
            backends: DashMap::new(),
            locks: Mutex::new(()),
        }
    }

    pub fn add(&self, host: String, route: RouteConfig) -> Result<Arc<Backend>, ProxyError> {
        if host.trim().is_empty() {
            return Err(ProxyError::config_invalid("host must not be empty"));
        }
        let _guard = self.locks.lock().unwrap();
        let backend = Arc::new(Backend::new(host.clone(), route)?);
        self.backends.insert(host, backend.clone());
        Ok(backend)
    }

    pub fn remove(&self, host: &str) -> Result<(), ProxyError> {
        let _guard = self.locks.lock().unwrap();
        match self.backends.remove(host) {
            Some((_, backend)) => {
                backend.close();
                Ok(())
            }
            None => Err(ProxyError::host_not_configured(format!("unknown host: {host}"))),
        }
    }

    pub fn get(&self, host: &str) -> Result<Arc<Backend>, ProxyError> {
        self.backends
            .get(host)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProxyError::host_not_configured(format!("unknown host: {host}")))
    }

    pub fn list(&self) -> Vec<Arc<Backend>> {
        self.backends.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::{PrometheusRecorder, TracingLogger};

    fn route(url: &str) -> RouteConfig {
        RouteConfig {
            url: url.to_string(),
            ..RouteConfig::default()
        }
    }

    #[test]
    fn backend_url_requires_scheme_and_host() {
        assert!(BackendUrl::new("http://example.com").is_ok());
        assert!(BackendUrl::new("example.com").is_err());
        assert!(BackendUrl::new("ftp://example.com").is_err());
    }

    #[test]
    fn backend_starts_healthy_and_tracks_transitions() {
        let backend = Backend::new("api", route("http://127.0.0.1:1")).unwrap();
        assert!(backend.is_healthy());

        let logger = TracingLogger;
        let metrics = PrometheusRecorder;
        assert!(backend.set_healthy(false, &logger, &metrics));
        assert!(!backend.is_healthy());
        // Setting the same value again is not a transition.
        assert!(!backend.set_healthy(false, &logger, &metrics));
        assert!(backend.set_healthy(true, &logger, &metrics));
        assert!(backend.is_healthy());
    }

    #[test]
    fn manager_rejects_empty_host_and_unknown_lookups() {
        let manager = BackendManager::new();
        assert!(manager.add(String::new(), route("http://127.0.0.1:1")).is_err());
        assert!(manager.get("missing").is_err());
        assert!(manager.remove("missing").is_err());
    }

    #[test]
    fn manager_add_get_remove_round_trips() {
        let manager = BackendManager::new();
        manager.add("api.example.com".to_string(), route("http://127.0.0.1:1")).unwrap();
        let backend = manager.get("api.example.com").unwrap();
        assert_eq!(backend.name(), "api.example.com");
        assert_eq!(manager.list().len(), 1);
        manager.remove("api.example.com").unwrap();
        assert!(manager.get("api.example.com").is_err());
    }
}
