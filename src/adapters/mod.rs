//! Concrete implementations of `crate::ports` against real transports,
//! the filesystem, and third-party services. The core never depends on
//! anything in this module directly; servers and `Application` wire them
//! together.
pub mod cert_storage;
pub mod health_checker;
pub mod health_routes;
pub mod http_server;
pub mod https_server;
pub mod tls;

pub use cert_storage::FileCertStorage;
pub use health_checker::PeriodicHealthChecker;
pub use http_server::HttpServer;
pub use https_server::HttpsServer;
