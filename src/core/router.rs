//! Router (§4.2): host → Backend resolution with normalization, a health
//! gate, and a registration API. Reads and writes are serialized by a
//! reader-writer lock so concurrent lookups never serialize with each
//! other.
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::backend::Backend;
use crate::errors::ProxyError;
use crate::observability::Logger;

/// Normalizes a Host header per §3: lowercase, strip a trailing `:port`
/// unless the string is a bare IPv6 address (more than one `:`, no
/// leading `[`).
pub fn normalize_host(host: &str) -> String {
    let lower = host.to_ascii_lowercase();
    let colon_count = lower.matches(':').count();
    let looks_bracketed_ipv6 = lower.starts_with('[');

    if colon_count > 1 && !looks_bracketed_ipv6 {
        // Bare IPv6 literal (no brackets): preserve as-is apart from case.
        return lower;
    }

    match lower.rfind(':') {
        Some(idx) if lower[idx + 1..].chars().all(|c| c.is_ascii_digit()) && idx + 1 < lower.len() => {
            lower[..idx].to_string()
        }
        _ => lower,
    }
}

pub struct HostRouter {
    routes: RwLock<HashMap<String, Arc<Backend>>>,
    logger: Arc<dyn Logger>,
}

impl HostRouter {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            logger,
        }
    }

    pub fn route(&self, host: &str) -> Result<Arc<Backend>, ProxyError> {
        if host.trim().is_empty() {
            return Err(ProxyError::invalid_host("empty Host header"));
        }
        let normalized = normalize_host(host);

        let backend = {
            let routes = self.routes.read().unwrap();
            routes.get(&normalized).cloned()
        };

        let Some(backend) = backend else {
            self.logger.warn(
                "no route configured for host",
                &[("host", host), ("normalized_host", &normalized)],
            );
            return Err(ProxyError::host_not_configured(format!("unknown host: {host}")));
        };

        if !backend.is_healthy() {
            return Err(ProxyError::backend_unavailable(format!(
                "no healthy backend for host: {host}"
            ))
            .with_attr("host", host.to_string()));
        }

        self.logger.debug("routed request", &[("host", host), ("backend", backend.name())]);
        Ok(backend)
    }

    pub fn register(&self, host: String, backend: Arc<Backend>) {
        let normalized = normalize_host(&host);
        self.routes.write().unwrap().insert(normalized, backend);
    }

    pub fn unregister(&self, host: &str) -> Option<Arc<Backend>> {
        let normalized = normalize_host(host);
        self.routes.write().unwrap().remove(&normalized)
    }

    pub fn backends(&self) -> Vec<Arc<Backend>> {
        self.routes.read().unwrap().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use crate::observability::TracingLogger;

    fn backend(name: &str) -> Arc<Backend> {
        Arc::new(
            Backend::new(
                name,
                RouteConfig {
                    url: "http://127.0.0.1:1".to_string(),
                    ..RouteConfig::default()
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn normalization_strips_port_and_lowercases() {
        assert_eq!(normalize_host("Example.com:8080"), "example.com");
        assert_eq!(normalize_host("EXAMPLE.COM"), "example.com");
        assert_eq!(normalize_host("example.com"), "example.com");
    }

    #[test]
    fn normalization_preserves_bare_ipv6() {
        let bare = "fe80::1:2:3";
        assert_eq!(normalize_host(bare), bare.to_ascii_lowercase());
    }

    #[test]
    fn normalization_strips_port_from_bracketed_ipv6() {
        assert_eq!(normalize_host("[::1]:8080"), "[::1]:8080".trim_end_matches(":8080"));
    }

    #[test]
    fn empty_host_is_invalid() {
        let router = HostRouter::new(Arc::new(TracingLogger));
        assert!(matches!(
            router.route("").unwrap_err().kind,
            crate::errors::ProxyErrorKind::InvalidHost
        ));
    }

    #[test]
    fn unregistered_host_is_not_configured() {
        let router = HostRouter::new(Arc::new(TracingLogger));
        let err = router.route("unknown.example.com").unwrap_err();
        assert!(matches!(err.kind, crate::errors::ProxyErrorKind::HostNotConfigured));
    }

    #[test]
    fn healthy_registered_backend_routes_successfully() {
        let router = HostRouter::new(Arc::new(TracingLogger));
        let backend = backend("api.example.com");
        router.register("api.example.com".to_string(), backend.clone());
        let resolved = router.route("API.EXAMPLE.COM:443").unwrap();
        assert_eq!(resolved.name(), "api.example.com");
    }

    #[test]
    fn unhealthy_backend_yields_unavailable() {
        let router = HostRouter::new(Arc::new(TracingLogger));
        let backend = backend("api.example.com");
        backend.set_healthy(false, &TracingLogger, &crate::observability::PrometheusRecorder);
        router.register("api.example.com".to_string(), backend);
        let err = router.route("api.example.com").unwrap_err();
        assert!(matches!(err.kind, crate::errors::ProxyErrorKind::BackendUnavailable));
    }

    #[test]
    fn unregister_removes_route() {
        let router = HostRouter::new(Arc::new(TracingLogger));
        router.register("api.example.com".to_string(), backend("api.example.com"));
        assert!(router.unregister("api.example.com").is_some());
        assert!(router.route("api.example.com").is_err());
    }
}
