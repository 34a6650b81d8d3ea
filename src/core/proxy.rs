//! ProxyHandler (§4.4): the per-request pipeline — request-id handling,
//! routing, the circuit-breaker gate, connection pool acquisition,
//! Forwarded-header rewriting, and backend-request metrics.
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};

use crate::core::backend::{Backend, Body};
use crate::core::circuit_breaker::CircuitBreaker;
use crate::core::connection_pool::ConnectionPool;
use crate::core::rate_limiter::RequestRateLimiter;
use crate::core::router::HostRouter;
use crate::errors::{ErrorBody, ProxyError};
use crate::observability::context::accept_or_generate;
use crate::observability::{Logger, MetricsRecorder, RequestTimer};

const VIA_MARKER: &str = "rwwwrse";

/// Transport-layer facts the server adapter knows and the core does not:
/// the peer address and whether this connection terminated TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMeta {
    pub remote_ip: Option<IpAddr>,
    pub is_tls: bool,
}

pub struct ProxyHandler {
    router: Arc<HostRouter>,
    circuit_breaker: Arc<CircuitBreaker>,
    pool: Arc<ConnectionPool>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsRecorder>,
    rate_limiter: Option<Arc<RequestRateLimiter>>,
    rate_limit_header: Option<http::HeaderName>,
}

impl ProxyHandler {
    pub fn new(
        router: Arc<HostRouter>,
        circuit_breaker: Arc<CircuitBreaker>,
        pool: Arc<ConnectionPool>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self { router, circuit_breaker, pool, logger, metrics, rate_limiter: None, rate_limit_header: None }
    }

    /// Installs the optional per-request admission gate (SPEC_FULL §4.13),
    /// consulted immediately after routing and before the circuit breaker.
    pub fn with_rate_limiter(mut self, limiter: Arc<RequestRateLimiter>, header_name: Option<http::HeaderName>) -> Self {
        self.rate_limiter = Some(limiter);
        self.rate_limit_header = header_name;
        self
    }

    pub async fn handle(&self, req: Request<Body>, meta: RequestMeta) -> Response<Body> {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let mut timer = RequestTimer::new(self.metrics.as_ref(), method, path);

        let request_id = accept_or_generate(req.headers().get("x-request-id").and_then(|v| v.to_str().ok()));

        let mut response = match self.forward(req, &request_id, &meta).await {
            Ok(resp) => resp,
            Err(err) => self.render_error(&err, &request_id),
        };
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        timer.set_status(response.status().as_u16());
        response
    }

    async fn forward(&self, req: Request<Body>, request_id: &str, meta: &RequestMeta) -> Result<Response<Body>, ProxyError> {
        let host_header = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let backend = self.router.route(&host_header)?;

        if let Some(limiter) = &self.rate_limiter {
            let header_value = self
                .rate_limit_header
                .as_ref()
                .and_then(|name| req.headers().get(name))
                .and_then(|v| v.to_str().ok());
            limiter.check(meta.remote_ip, header_value, self.logger.as_ref())?;
        }

        if !self.circuit_breaker.allow(backend.name()) {
            return Err(ProxyError::circuit_breaker_open(format!(
                "circuit open for backend {}",
                backend.name()
            )));
        }

        self.pool.acquire(&backend)?;
        let outbound = rewrite_request(req, &backend, meta, request_id)?;

        let backend_start = Instant::now();
        let result = backend.transport().request(outbound).await;
        self.pool.release(backend.name());

        match result {
            Ok(resp) => {
                self.circuit_breaker.record_success(backend.name());
                let status = resp.status().as_u16();
                self.metrics.record_backend_request(backend.name(), status, backend_start.elapsed());
                self.logger.debug(
                    "forwarded request",
                    &[("backend", backend.name()), ("request_id", request_id)],
                );
                let (parts, incoming) = resp.into_parts();
                let body = incoming.map_err(|err| Box::new(err) as crate::core::backend::BodyError).boxed();
                Ok(Response::from_parts(parts, body))
            }
            Err(err) => {
                self.circuit_breaker.record_failure(backend.name());
                self.metrics.record_backend_request(backend.name(), 502, backend_start.elapsed());
                Err(ProxyError::backend_connection_failed(format!(
                    "backend request to {} failed: {err}",
                    backend.name()
                ))
                .with_cause(err)
                .with_attr("backend", backend.name().to_string()))
            }
        }
    }

    fn render_error(&self, err: &ProxyError, request_id: &str) -> Response<Body> {
        let kind = err.kind.to_string();
        let fields = [("request_id", request_id), ("kind", kind.as_str())];
        if err.status().is_server_error() {
            self.logger.error(&err.message, &fields);
        } else {
            self.logger.warn(&err.message, &fields);
        }

        let body = ErrorBody::from_error(err, request_id);
        let json = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
        Response::builder()
            .status(err.status())
            .header(http::header::CONTENT_TYPE, "application/json")
            .header("x-request-id", request_id)
            .body(empty_error_body(json))
            .unwrap_or_else(|_| Response::new(empty_error_body(Vec::new())))
    }
}

fn empty_error_body(bytes: Vec<u8>) -> Body {
    Full::new(Bytes::from(bytes))
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Rewrites an inbound request onto the backend's target, injecting
/// Forwarded* headers and a request-id/Via marker. Pure and synchronous so
/// it is unit-testable without a live backend.
fn rewrite_request(req: Request<Body>, backend: &Backend, meta: &RequestMeta, request_id: &str) -> Result<Request<Body>, ProxyError> {
    let (mut parts, body) = req.into_parts();

    let original_host = parts
        .headers
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();
    let target = format!("{}{}", backend.url().as_str().trim_end_matches('/'), path_and_query);
    let uri: http::Uri = target
        .parse()
        .map_err(|err| ProxyError::routing_failed(format!("invalid forwarded uri: {target}")).with_cause(err))?;
    parts.uri = uri;

    if let Some(host) = parts.uri.host() {
        if let Ok(value) = HeaderValue::from_str(host) {
            parts.headers.insert(http::header::HOST, value);
        }
    }

    let forwarded_for = parts
        .headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .or_else(|| meta.remote_ip.map(|ip| ip.to_string()));
    if let Some(value) = forwarded_for.and_then(|v| HeaderValue::from_str(&v).ok()) {
        parts.headers.insert("x-forwarded-for", value);
    }
    parts
        .headers
        .insert("x-forwarded-proto", HeaderValue::from_static(if meta.is_tls { "https" } else { "http" }));
    if let Ok(value) = HeaderValue::from_str(&original_host) {
        if !original_host.is_empty() {
            parts.headers.insert("x-forwarded-host", value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        parts.headers.insert("x-request-id", value);
    }
    parts.headers.insert(http::header::VIA, HeaderValue::from_static(VIA_MARKER));

    Ok(Request::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    fn backend() -> Backend {
        Backend::new(
            "api",
            RouteConfig {
                url: "http://10.0.0.5:9000".to_string(),
                ..RouteConfig::default()
            },
        )
        .unwrap()
    }

    fn empty_request(uri: &str, host: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(http::header::HOST, host)
            .body(Full::new(Bytes::new()).map_err(|never: Infallible| match never {}).boxed())
            .unwrap()
    }

    #[test]
    fn rewrite_targets_backend_and_preserves_path() {
        let backend = backend();
        let req = empty_request("/v1/widgets?x=1", "public.example.com");
        let meta = RequestMeta { remote_ip: Some("203.0.113.9".parse().unwrap()), is_tls: true };
        let rewritten = rewrite_request(req, &backend, &meta, "deadbeefdeadbeefdeadbeefdeadbeef").unwrap();

        assert_eq!(rewritten.uri().host(), Some("10.0.0.5"));
        assert_eq!(rewritten.uri().path(), "/v1/widgets");
        assert_eq!(rewritten.headers().get(http::header::HOST).unwrap(), "10.0.0.5");
        assert_eq!(rewritten.headers().get("x-forwarded-host").unwrap(), "public.example.com");
        assert_eq!(rewritten.headers().get("x-forwarded-proto").unwrap(), "https");
        assert_eq!(rewritten.headers().get("x-forwarded-for").unwrap(), "203.0.113.9");
        assert_eq!(rewritten.headers().get(http::header::VIA).unwrap(), VIA_MARKER);
    }

    #[test]
    fn rewrite_prefers_real_ip_header_over_remote_addr() {
        let backend = backend();
        let mut req = empty_request("/", "public.example.com");
        req.headers_mut().insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        let meta = RequestMeta { remote_ip: Some("203.0.113.9".parse().unwrap()), is_tls: false };
        let rewritten = rewrite_request(req, &backend, &meta, "id").unwrap();

        assert_eq!(rewritten.headers().get("x-forwarded-for").unwrap(), "198.51.100.7");
        assert_eq!(rewritten.headers().get("x-forwarded-proto").unwrap(), "http");
    }

    #[test]
    fn rewrite_falls_back_to_no_forwarded_for_when_absent() {
        let backend = backend();
        let req = empty_request("/", "public.example.com");
        let meta = RequestMeta::default();
        let rewritten = rewrite_request(req, &backend, &meta, "id").unwrap();
        assert!(rewritten.headers().get("x-forwarded-for").is_none());
    }
}
