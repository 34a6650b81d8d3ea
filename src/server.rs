//! ServerManager (§4.10): a named set of independently startable/stoppable
//! listeners. Grounded on the teacher's `UnifiedServer`
//! (`adapters/unified_server.rs`), which runs a primary and an optional
//! secondary listener side by side and tears both down on one shutdown
//! signal; generalized here to an arbitrary number of named
//! `ManagedServer`s since this crate's HTTP and HTTPS listeners are peers
//! rather than primary/secondary.
use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;
use tokio::task::JoinHandle;

use crate::errors::ProxyError;
use crate::observability::Logger;
use crate::ports::server::ManagedServer;

struct Running {
    server: Arc<dyn ManagedServer>,
    handle: JoinHandle<Result<()>>,
}

/// ServerManager (§4.10): a named set of listeners started and stopped
/// together. Grounded on the teacher's `UnifiedServer`
/// (`adapters/unified_server.rs`), which runs a primary and an optional
/// secondary listener side by side and tears both down on one shutdown
/// signal; generalized here to an arbitrary number of named
/// `ManagedServer`s since this crate's HTTP and HTTPS listeners are peers
/// rather than primary/secondary.
pub struct ServerManager {
    running: Vec<Running>,
    logger: Arc<dyn Logger>,
}

impl ServerManager {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { running: Vec::new(), logger }
    }

    /// StartAll: requires at least one server and rejects re-start (this
    /// manager is meant to be populated exactly once per `Application`
    /// lifetime; call `stop_all` before starting a fresh set). Each
    /// listener's `run()` runs on its own spawned task; returns once every
    /// listener's task has been spawned, not once they've bound (binding
    /// failures surface as the task's `Err` result, observable via
    /// `stop_all`'s join).
    pub fn start_all(&mut self, servers: Vec<Arc<dyn ManagedServer>>) -> Result<(), ProxyError> {
        if !self.running.is_empty() {
            return Err(ProxyError::internal_error("server manager already started"));
        }
        if servers.is_empty() {
            return Err(ProxyError::internal_error("start_all requires at least one server"));
        }
        for server in servers {
            let name = server.name().to_string();
            let task_server = server.clone();
            let handle = tokio::spawn(async move { task_server.run().await });
            self.logger.info("server started", &[("server", &name)]);
            self.running.push(Running { server, handle });
        }
        Ok(())
    }

    /// StopAll: signals every tracked listener to shut down in parallel,
    /// then awaits each `run()` task to completion, aggregating errors
    /// into a single log line per listener rather than propagating (one
    /// listener failing should not prevent the others from being told to
    /// stop).
    pub async fn stop_all(&mut self) {
        let shutdowns = self.running.iter().map(|running| running.server.shutdown());
        for (running, result) in self.running.iter().zip(join_all(shutdowns).await) {
            if let Err(err) = result {
                self.logger
                    .warn("server shutdown signal failed", &[("server", running.server.name()), ("error", &err.to_string())]);
            }
        }
        for running in self.running.drain(..) {
            match running.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    self.logger.error("server exited with error", &[("server", running.server.name()), ("error", &err.to_string())]);
                }
                Err(join_err) => {
                    self.logger.error("server task panicked", &[("server", running.server.name()), ("error", &join_err.to_string())]);
                }
            }
        }
    }

    /// RemoveServer: stops the named listener's task before dropping it
    /// from the tracked set. No-op if the name isn't tracked.
    pub async fn remove_server(&mut self, name: &str) {
        let Some(index) = self.running.iter().position(|running| running.server.name() == name) else {
            return;
        };
        let running = self.running.remove(index);
        if let Err(err) = running.server.shutdown().await {
            self.logger
                .warn("server shutdown signal failed", &[("server", name), ("error", &err.to_string())]);
        }
        if let Err(err) = running.handle.await {
            self.logger.error("server task panicked", &[("server", name), ("error", &err.to_string())]);
        }
    }

    /// Liveness is at-least-one-server-started: true only while every
    /// tracked listener's task is still running.
    pub fn is_healthy(&self) -> bool {
        !self.running.is_empty() && self.running.iter().all(|running| !running.handle.is_finished())
    }

    pub fn server_names(&self) -> Vec<String> {
        self.running.iter().map(|running| running.server.name().to_string()).collect()
    }
}
