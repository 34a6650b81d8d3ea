//! ConnectionPool (§4.3): shares each Backend's own transport across
//! callers, tracking active/idle counts. Creation is double-checked so
//! concurrent first-callers for the same backend don't race to build two
//! transports.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::core::backend::{Backend, Transport};
use crate::errors::ProxyError;

struct PoolEntry {
    transport: Transport,
    active: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// A name → shared `Transport` map. Each entry is the exact transport
/// instance `ProxyHandler` uses to forward requests for that backend, so
/// "releasing" a connection is a no-op on the transport itself (hyper
/// returns it to its own pool); `release` only decrements the active
/// counter this type tracks for `stats()`.
pub struct ConnectionPool {
    entries: DashMap<String, Arc<PoolEntry>>,
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Returns the shared transport for `backend`, inserting it on first
    /// use. Double-checked: a racing insert from another task loses and
    /// its transport is simply dropped.
    pub fn acquire(&self, backend: &Backend) -> Result<Arc<Transport>, ProxyError> {
        if backend.name().is_empty() {
            return Err(ProxyError::config_invalid("backend must have a name to pool a connection"));
        }
        if let Some(entry) = self.entries.get(backend.name()) {
            entry.active.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::new(entry.transport.clone()));
        }
        let entry = Arc::new(PoolEntry {
            transport: backend.transport().clone(),
            active: AtomicUsize::new(1),
        });
        self.entries.entry(backend.name().to_string()).or_insert_with(|| entry.clone());
        Ok(Arc::new(entry.transport.clone()))
    }

    pub fn release(&self, backend_name: &str) {
        if let Some(entry) = self.entries.get(backend_name) {
            let current = entry.active.load(Ordering::Relaxed);
            if current > 0 {
                entry.active.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self, backend_name: &str) -> PoolStats {
        match self.entries.get(backend_name) {
            Some(entry) => {
                let active = entry.active.load(Ordering::Relaxed);
                let total = 1;
                PoolStats {
                    total,
                    active,
                    idle: total.saturating_sub(active),
                    in_use: active,
                }
            }
            None => PoolStats::default(),
        }
    }

    pub fn remove(&self, backend_name: &str) {
        self.entries.remove(backend_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;

    fn backend(name: &str) -> Backend {
        Backend::new(
            name,
            RouteConfig {
                url: "http://127.0.0.1:1".to_string(),
                ..RouteConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn acquire_tracks_active_count() {
        let pool = ConnectionPool::new();
        let backend = backend("api");
        pool.acquire(&backend).unwrap();
        pool.acquire(&backend).unwrap();
        let stats = pool.stats("api");
        assert_eq!(stats.active, 2);
        pool.release("api");
        assert_eq!(pool.stats("api").active, 1);
    }

    #[test]
    fn unknown_backend_has_empty_stats() {
        let pool = ConnectionPool::new();
        assert_eq!(pool.stats("missing").total, 0);
    }

    #[test]
    fn idle_is_total_minus_active() {
        let pool = ConnectionPool::new();
        let backend = backend("api");
        pool.acquire(&backend).unwrap();
        let stats = pool.stats("api");
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.idle, 0);

        pool.release("api");
        let stats = pool.stats("api");
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
    }
}
