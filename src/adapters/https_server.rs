//! TLS listener (§4.10), grounded on the teacher's TLS startup in
//! `main.rs` (`axum_server::bind_rustls` + `RustlsConfig::from_config`).
//! Shares `build_router` with the plain-HTTP listener; the rustls
//! `ServerConfig` is built once from the `TlsManager` at construction time
//! since its cert resolver reads a live, shared domain map, so certificate
//! installs/renewals are visible without rebuilding the config.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use crate::adapters::http_server::build_router;
use crate::adapters::tls::HttpChallengeStore;
use crate::core::health::Reporter;
use crate::core::proxy::ProxyHandler;
use crate::ports::server::{ManagedServer, ServerRunFuture};
use crate::ports::tls::TlsManager;

pub struct HttpsServer {
    name: String,
    addr: SocketAddr,
    router: Router,
    tls_config: RustlsConfig,
    handle: Handle,
    graceful_timeout: Duration,
}

impl HttpsServer {
    pub fn new(
        name: impl Into<String>,
        addr: SocketAddr,
        proxy: Arc<ProxyHandler>,
        challenge_store: Option<Arc<HttpChallengeStore>>,
        health_reporter: Option<Arc<Reporter>>,
        tls_manager: &dyn TlsManager,
        graceful_timeout: Duration,
    ) -> Result<Self> {
        let rustls_config = tls_manager
            .get_tls_config()
            .context("failed to build rustls server config")?;
        Ok(Self {
            name: name.into(),
            addr,
            router: build_router(proxy, challenge_store, health_reporter, true),
            tls_config: RustlsConfig::from_config(rustls_config),
            handle: Handle::new(),
            graceful_timeout,
        })
    }
}

impl ManagedServer for HttpsServer {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self) -> ServerRunFuture<'a> {
        Box::pin(async move {
            axum_server::bind_rustls(self.addr, self.tls_config.clone())
                .handle(self.handle.clone())
                .serve(self.router.clone().into_make_service_with_connect_info::<SocketAddr>())
                .await
                .with_context(|| format!("https server error on {}", self.addr))?;
            Ok(())
        })
    }

    /// Stops accepting new connections and gives in-flight ones up to
    /// `graceful_timeout` to finish, mirroring `HttpServer::shutdown`.
    fn shutdown<'a>(&'a self) -> ServerRunFuture<'a> {
        Box::pin(async move {
            self.handle.graceful_shutdown(Some(self.graceful_timeout));
            Ok(())
        })
    }
}
