//! Manually-managed TLSManager (§4.8): domains are registered via
//! `AddDomain` and certificates installed via an explicit
//! `SetCertificate` back-channel; `RenewCertificates` is a no-op.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rustls::server::ClientHello;
use rustls::sign::CertifiedKey;
use rustls::ServerConfig as RustlsServerConfig;

use crate::config::TlsVersion;
use crate::errors::ProxyError;
use crate::ports::tls::{Certificate, CertificateInfo, TlsManager};

use super::{alpn_protocols, days_until, parse_certified_key, protocol_versions, SniResolver};

pub struct SimpleTlsManager {
    domains: Arc<DashMap<String, Arc<CertifiedKey>>>,
    managed: DashMap<String, ()>,
    info: DashMap<String, CertificateInfo>,
    min_version: TlsVersion,
    started: AtomicBool,
}

impl SimpleTlsManager {
    pub fn new(min_version: TlsVersion) -> Self {
        Self {
            domains: Arc::new(DashMap::new()),
            managed: DashMap::new(),
            info: DashMap::new(),
            min_version,
            started: AtomicBool::new(false),
        }
    }

    /// SetCertificate: installs a certificate for a domain already
    /// registered via `AddDomain`; fails with `CertInvalid` ("domain not
    /// managed") otherwise.
    pub fn set_certificate(&self, cert: Certificate) -> Result<(), ProxyError> {
        if !self.managed.contains_key(&cert.domain) {
            return Err(ProxyError::cert_invalid(format!("domain not managed: {}", cert.domain)));
        }
        let certified_key = parse_certified_key(&cert.cert_pem, &cert.key_pem)?;
        self.domains.insert(cert.domain.clone(), Arc::new(certified_key));
        self.info.insert(
            cert.domain.clone(),
            CertificateInfo {
                status: "active".to_string(),
                sans: cert.sans,
                issuer: cert.issuer,
                issued_at: cert.issued_at,
                expires_at: cert.expires_at,
                days_until_expiry: days_until(cert.expires_at),
                auto_renew: false,
            },
        );
        Ok(())
    }
}

impl TlsManager for SimpleTlsManager {
    fn get_certificate(&self, hello: &ClientHello) -> Result<Arc<CertifiedKey>, ProxyError> {
        let name = hello.server_name().ok_or_else(|| ProxyError::tls_handshake("no SNI"))?;
        self.domains
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProxyError::cert_not_found(format!("no certificate for {name}")))
    }

    fn get_tls_config(&self) -> Result<Arc<RustlsServerConfig>, ProxyError> {
        let resolver = Arc::new(SniResolver { domains: self.domains.clone() });
        let mut config = RustlsServerConfig::builder_with_protocol_versions(protocol_versions(self.min_version))
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        config.alpn_protocols = alpn_protocols();
        Ok(Arc::new(config))
    }

    fn add_domain(&self, domain: &str) -> Result<(), ProxyError> {
        if domain.trim().is_empty() || !domain.contains('.') {
            return Err(ProxyError::config_invalid(format!("invalid domain: '{domain}'")));
        }
        self.managed.insert(domain.to_string(), ());
        Ok(())
    }

    fn remove_domain(&self, domain: &str) {
        self.managed.remove(domain);
        self.domains.remove(domain);
        self.info.remove(domain);
    }

    fn get_domains(&self) -> Vec<String> {
        self.managed.iter().map(|entry| entry.key().clone()).collect()
    }

    fn renew_certificates(&self) -> Result<(), ProxyError> {
        Ok(())
    }

    fn get_certificate_info(&self, domain: &str) -> Result<CertificateInfo, ProxyError> {
        self.info
            .get(domain)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ProxyError::cert_not_found(format!("no certificate info for {domain}")))
    }

    fn start(&self) -> Result<(), ProxyError> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<(), ProxyError> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn test_cert(domain: &str) -> Certificate {
        // A self-signed cert/key pair generated at test time via rcgen, so
        // `parse_certified_key` has real PEM to parse.
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        Certificate {
            domain: domain.to_string(),
            sans: vec![domain.to_string()],
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            issued_at: SystemTime::now(),
            expires_at: SystemTime::now() + Duration::from_secs(90 * 24 * 3600),
            issuer: "test".to_string(),
            serial: "1".to_string(),
        }
    }

    #[test]
    fn rejects_certificate_for_unmanaged_domain() {
        let manager = SimpleTlsManager::new(TlsVersion::V1_2);
        let err = manager.set_certificate(test_cert("example.com")).unwrap_err();
        assert!(matches!(err.kind, crate::errors::ProxyErrorKind::CertInvalid));
    }

    #[test]
    fn add_domain_validates_shape() {
        let manager = SimpleTlsManager::new(TlsVersion::V1_2);
        assert!(manager.add_domain("").is_err());
        assert!(manager.add_domain("not-a-domain").is_err());
        assert!(manager.add_domain("example.com").is_ok());
    }

    #[test]
    fn set_certificate_installs_and_reports_info() {
        let manager = SimpleTlsManager::new(TlsVersion::V1_2);
        manager.add_domain("example.com").unwrap();
        manager.set_certificate(test_cert("example.com")).unwrap();
        let info = manager.get_certificate_info("example.com").unwrap();
        assert_eq!(info.status, "active");
        assert!(manager.get_domains().contains(&"example.com".to_string()));
    }

    #[test]
    fn remove_domain_drops_cert_and_info() {
        let manager = SimpleTlsManager::new(TlsVersion::V1_2);
        manager.add_domain("example.com").unwrap();
        manager.set_certificate(test_cert("example.com")).unwrap();
        manager.remove_domain("example.com");
        assert!(manager.get_certificate_info("example.com").is_err());
        assert!(!manager.get_domains().contains(&"example.com".to_string()));
    }

    #[test]
    fn start_stop_toggle_health() {
        let manager = SimpleTlsManager::new(TlsVersion::V1_2);
        assert!(!manager.is_healthy());
        manager.start().unwrap();
        assert!(manager.is_healthy());
        manager.stop().unwrap();
        assert!(!manager.is_healthy());
    }
}
