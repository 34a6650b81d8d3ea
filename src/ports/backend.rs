//! Port for the Backend capability set (§4.1).
use std::future::Future;

/// Capability set a routable upstream must expose. Implemented concretely
/// by [`crate::core::backend::Backend`]; kept as a trait so tests can
/// substitute doubles without a real transport.
pub trait BackendHandle: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn url(&self) -> &str;
    fn is_healthy(&self) -> bool;
    fn set_healthy(&self, healthy: bool) -> bool;
}

/// Port for registering/removing backends at runtime (admin API surface).
pub trait BackendManagement: Send + Sync + 'static {
    type Backend: BackendHandle;
    type Error;

    fn add(&self, host: String, route: crate::config::RouteConfig) -> Result<(), Self::Error>;
    fn remove(&self, host: &str) -> Result<(), Self::Error>;
    fn get(&self, host: &str) -> Result<std::sync::Arc<Self::Backend>, Self::Error>;
    fn list(&self) -> Vec<std::sync::Arc<Self::Backend>>;
}

/// Marker alias for async operations a port may need to express without
/// pulling in `async_trait`; implementors used directly in this crate use
/// inherent `async fn`s instead, so this remains unused outside tests that
/// want to box a future explicitly.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn Future<Output = T> + Send + 'a>>;
