//! Configuration surface: loading, validation, and the typed model.
//! Treated as an external collaborator by the core (routing, health,
//! circuit breaking, TLS lifecycle) but implemented in full here rather
//! than stubbed, per the ambient-stack requirement.
pub mod loader;
pub mod models;
pub mod validation;

pub use loader::ConfigLoader;
pub use models::{
    AppConfig, BackendsConfig, HealthConfig, MissingKeyPolicy, RateLimitBy, RateLimitConfig,
    RouteConfig, ServerConfig, TlsConfig, TlsVersion,
};
