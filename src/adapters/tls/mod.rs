//! TLS lifecycle adapters (§4.8): a manually-managed `Simple` manager and
//! an ACME-backed manager, sharing an SNI cert resolver and a PEM→
//! `CertifiedKey` parser since both present the same `TlsManager` port.
pub mod acme;
pub mod challenge;
pub mod simple;

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use rustls::sign::CertifiedKey;

use crate::errors::ProxyError;

pub use acme::AcmeTlsManager;
pub use challenge::HttpChallengeStore;
pub use simple::SimpleTlsManager;

/// Resolves a `CertifiedKey` by SNI against a shared domain→cert map. Both
/// `SimpleTlsManager` and `AcmeTlsManager` hand the same `Arc<DashMap>` to
/// one of these so updates (manual install or ACME renewal) are visible to
/// already-built `ServerConfig`s without rebuilding them.
pub(super) struct SniResolver {
    pub domains: Arc<DashMap<String, Arc<CertifiedKey>>>,
}

impl rustls::server::ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: rustls::server::ClientHello) -> Option<Arc<CertifiedKey>> {
        let name = client_hello.server_name()?;
        self.domains.get(name).map(|entry| entry.value().clone())
    }
}

/// Parses a PEM certificate chain and private key into a rustls
/// `CertifiedKey`, using the process's installed default crypto provider
/// to build the signing key.
pub(super) fn parse_certified_key(cert_pem: &str, key_pem: &str) -> Result<CertifiedKey, ProxyError> {
    let chain: Vec<_> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(|err| ProxyError::cert_invalid("failed to parse certificate chain").with_cause(err))?;
    if chain.is_empty() {
        return Err(ProxyError::cert_invalid("certificate chain is empty"));
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|err| ProxyError::cert_invalid("failed to parse private key").with_cause(err))?
        .ok_or_else(|| ProxyError::cert_invalid("no private key found in PEM"))?;

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));
    let signing_key = provider
        .key_provider
        .load_private_key(key)
        .map_err(|err| ProxyError::cert_invalid("unsupported private key type").with_cause(err))?;

    Ok(CertifiedKey::new(chain, signing_key))
}

pub(super) fn days_until(expires_at: SystemTime) -> i64 {
    match expires_at.duration_since(SystemTime::now()) {
        Ok(remaining) => (remaining.as_secs() / 86_400) as i64,
        Err(_) => {
            let elapsed = SystemTime::now().duration_since(expires_at).unwrap_or_default();
            -((elapsed.as_secs() / 86_400) as i64)
        }
    }
}

pub(super) fn alpn_protocols() -> Vec<Vec<u8>> {
    vec![b"h2".to_vec(), b"http/1.1".to_vec()]
}

pub(super) fn protocol_versions(min_version: crate::config::TlsVersion) -> &'static [&'static rustls::SupportedProtocolVersion] {
    match min_version {
        crate::config::TlsVersion::V1_3 => &[&rustls::version::TLS13],
        crate::config::TlsVersion::V1_2 => rustls::ALL_VERSIONS,
    }
}
