//! Plain-HTTP listener (§4.10), grounded on the teacher's `HyperServer`
//! (`adapters/http/server.rs`): bind, build an axum `Router` whose
//! fallback hands every request to the core `ProxyHandler`, serve with
//! graceful shutdown. Also mounts the ACME HTTP-01 challenge route when
//! one is configured, since that must be reachable over plain HTTP even
//! when TLS is enabled for the main traffic.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{ConnectInfo, State};
use axum::response::Response as AxumResponse;
use axum::Router;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::time::sleep;

use crate::adapters::tls::HttpChallengeStore;
use crate::core::backend::BodyError;
use crate::core::proxy::{ProxyHandler, RequestMeta};
use crate::ports::server::{ManagedServer, ServerRunFuture};

/// Converts an inbound axum request body into the core's transport body
/// type, runs it through `ProxyHandler`, and converts the response back.
pub(crate) async fn proxy_fallback(
    State(proxy): State<Arc<ProxyHandler>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    is_tls: bool,
    req: axum::extract::Request,
) -> AxumResponse {
    let (parts, body) = req.into_parts();
    let body = body.map_err(|err| Box::new(err) as BodyError).boxed();
    let req = http::Request::from_parts(parts, body);

    let meta = RequestMeta {
        remote_ip: connect_info.map(|ConnectInfo(addr)| addr.ip()),
        is_tls,
    };

    let response = proxy.handle(req, meta).await;
    let (parts, body) = response.into_parts();
    AxumResponse::from_parts(parts, axum::body::Body::new(body))
}

/// Builds the router shared by the HTTP and HTTPS listeners: every path
/// falls through to the proxy, except the ACME challenge path when a
/// challenge store is mounted and the health/metrics routes when a
/// reporter is mounted.
pub(crate) fn build_router(
    proxy: Arc<ProxyHandler>,
    challenge_store: Option<Arc<HttpChallengeStore>>,
    health_reporter: Option<Arc<crate::core::health::Reporter>>,
    is_tls: bool,
) -> Router {
    let mut router = Router::new()
        .fallback(
            move |connect_info: Option<ConnectInfo<SocketAddr>>,
                  state: State<Arc<ProxyHandler>>,
                  req: axum::extract::Request| async move { proxy_fallback(state, connect_info, is_tls, req).await },
        )
        .with_state(proxy);

    if let Some(store) = challenge_store {
        router = crate::adapters::tls::challenge::challenge_router(store).merge(router);
    }
    if let Some(reporter) = health_reporter {
        router = crate::adapters::health_routes::health_router(reporter).merge(router);
    }
    router
}

pub struct HttpServer {
    name: String,
    addr: SocketAddr,
    router: Router,
    shutdown: Arc<Notify>,
    graceful_timeout: Duration,
}

impl HttpServer {
    pub fn new(
        name: impl Into<String>,
        addr: SocketAddr,
        proxy: Arc<ProxyHandler>,
        challenge_store: Option<Arc<HttpChallengeStore>>,
        health_reporter: Option<Arc<crate::core::health::Reporter>>,
        graceful_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            addr,
            router: build_router(proxy, challenge_store, health_reporter, false),
            shutdown: Arc::new(Notify::new()),
            graceful_timeout,
        }
    }
}

impl ManagedServer for HttpServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self) -> ServerRunFuture<'a> {
        Box::pin(async move {
            let listener = TcpListener::bind(self.addr)
                .await
                .with_context(|| format!("failed to bind http listener on {}", self.addr))?;
            let shutdown = self.shutdown.clone();
            axum::serve(listener, self.router.clone().into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(async move { shutdown.notified().await })
                .await
                .context("http server error")?;
            Ok(())
        })
    }

    /// Signals `run`'s in-flight `axum::serve` to stop accepting new
    /// connections, then gives existing connections up to
    /// `graceful_timeout` to finish before returning.
    fn shutdown<'a>(&'a self) -> ServerRunFuture<'a> {
        Box::pin(async move {
            self.shutdown.notify_one();
            sleep(self.graceful_timeout).await;
            Ok(())
        })
    }
}
