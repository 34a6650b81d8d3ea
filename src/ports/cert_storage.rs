//! Port for CertStorage (§4.9): durable per-domain certificate/key/
//! metadata persistence with exclusive, file-based locking.
use std::time::SystemTime;

use crate::errors::ProxyError;
use crate::ports::tls::{Certificate, CertificateMetadata};

pub trait CertStorage: Send + Sync + 'static {
    fn store_certificate(&self, cert: &Certificate) -> Result<(), ProxyError>;
    fn load_certificate(&self, domain: &str) -> Result<Certificate, ProxyError>;
    fn delete_certificate(&self, domain: &str) -> Result<(), ProxyError>;
    fn list_certificates(&self) -> Result<Vec<String>, ProxyError>;

    fn store_metadata(&self, domain: &str, metadata: &CertificateMetadata) -> Result<(), ProxyError>;
    fn load_metadata(&self, domain: &str) -> Result<CertificateMetadata, ProxyError>;

    fn lock(&self, key: &str) -> Result<LockGuard, ProxyError>;
}

/// An acquired, file-based exclusive lock. `Refresh` rewrites the
/// timestamp payload; dropping the guard unlocks (removes the lock file).
pub struct LockGuard {
    pub path: std::path::PathBuf,
    pub acquired_at: SystemTime,
}

impl LockGuard {
    pub fn refresh(&mut self) -> Result<(), ProxyError> {
        self.acquired_at = SystemTime::now();
        let payload = humantime::format_rfc3339(self.acquired_at).to_string();
        std::fs::write(&self.path, payload).map_err(|err| {
            ProxyError::internal_error(format!("failed to refresh lock {:?}", self.path)).with_cause(err)
        })
    }

    pub fn is_valid(&self) -> bool {
        self.path.exists()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
