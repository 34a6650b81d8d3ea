//! Port for the TLSManager capability (§4.8) and the Certificate data
//! model (§3). Two implementations are allowed: a manually-managed
//! `Simple` manager and an ACME-backed manager; both present this
//! interface and the same invariants.
use std::sync::Arc;
use std::time::SystemTime;

use rustls::server::ClientHello;
use rustls::sign::CertifiedKey;
use rustls::ServerConfig as RustlsServerConfig;

use crate::errors::ProxyError;

#[derive(Debug, Clone)]
pub struct Certificate {
    pub domain: String,
    pub sans: Vec<String>,
    pub cert_pem: String,
    pub key_pem: String,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
    pub issuer: String,
    pub serial: String,
}

#[derive(Debug, Clone)]
pub struct CertificateMetadata {
    pub created_at: SystemTime,
    pub last_updated: SystemTime,
    pub renewal_count: u32,
    pub next_renewal: SystemTime,
    pub challenge_type: String,
    pub management_enabled: bool,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub status: String,
    pub sans: Vec<String>,
    pub issuer: String,
    pub issued_at: SystemTime,
    pub expires_at: SystemTime,
    pub days_until_expiry: i64,
    pub auto_renew: bool,
}

pub trait TlsManager: Send + Sync + 'static {
    /// Resolves the certified key to present for an incoming ClientHello,
    /// based on its SNI.
    fn get_certificate(&self, hello: &ClientHello) -> Result<Arc<CertifiedKey>, ProxyError>;

    /// Builds the rustls `ServerConfig` to bind the HTTPS listener with;
    /// `GetCertificate` is wired in via a `ResolvesServerCert` adapter.
    fn get_tls_config(&self) -> Result<Arc<RustlsServerConfig>, ProxyError>;

    fn add_domain(&self, domain: &str) -> Result<(), ProxyError>;
    fn remove_domain(&self, domain: &str);
    fn get_domains(&self) -> Vec<String>;

    fn renew_certificates(&self) -> Result<(), ProxyError>;
    fn get_certificate_info(&self, domain: &str) -> Result<CertificateInfo, ProxyError>;

    fn start(&self) -> Result<(), ProxyError>;
    fn stop(&self) -> Result<(), ProxyError>;
    fn is_healthy(&self) -> bool;
}

/// HTTP-01 challenge handler contract (§4.8).
pub trait ChallengeStore: Send + Sync + 'static {
    fn set_challenge_data(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), ProxyError>;
    fn get_challenge_data(&self, host: &str, token: &str) -> Option<String>;
    fn clear_challenge_data(&self, domain: &str, token: &str);
}
