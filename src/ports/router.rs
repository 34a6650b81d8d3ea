//! Port for the Router capability (§4.2).
use crate::core::backend::Backend;
use crate::errors::ProxyError;
use std::sync::Arc;

/// `Router` resolves an inbound Host header to a live `Backend`. Exact
/// host match only in this core; no wildcards.
pub trait Router: Send + Sync + 'static {
    fn route(&self, host: &str) -> Result<Arc<Backend>, ProxyError>;
    fn register(&self, host: String, backend: Arc<Backend>);
    fn unregister(&self, host: &str) -> Option<Arc<Backend>>;
    fn backends(&self) -> Vec<Arc<Backend>>;
}
