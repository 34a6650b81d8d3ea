//! Capability-set traits ("ports") the core depends on. Concrete
//! implementations ("adapters") live under `crate::adapters`; tests
//! substitute doubles freely since everything here is a trait.
pub mod backend;
pub mod cert_storage;
pub mod circuit_breaker;
pub mod health;
pub mod router;
pub mod server;
pub mod tls;

pub use backend::{BackendHandle, BackendManagement};
pub use cert_storage::{CertStorage, LockGuard};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use health::{HealthChecker, HealthEvent, HealthEventType, HealthStatus, HealthTarget};
pub use router::Router;
pub use server::ManagedServer;
pub use tls::{CertificateInfo, ChallengeStore, TlsManager};
