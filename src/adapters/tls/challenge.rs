//! HTTP-01 challenge store (§4.8): the ACME manager stages key
//! authorizations here, and an axum route exposes them under
//! `/.well-known/acme-challenge/{token}` for the CA's validation request.
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;

use crate::errors::ProxyError;
use crate::ports::tls::ChallengeStore;

#[derive(Default)]
pub struct HttpChallengeStore {
    // keyed by (domain, token); `get_challenge_data` is keyed by (host,
    // token) at lookup time, with host normalized the same way the router
    // normalizes it so port suffixes on the validation request don't miss.
    entries: DashMap<(String, String), String>,
}

impl HttpChallengeStore {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl ChallengeStore for HttpChallengeStore {
    fn set_challenge_data(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), ProxyError> {
        if domain.trim().is_empty() || token.trim().is_empty() || key_auth.trim().is_empty() {
            return Err(ProxyError::request_invalid("challenge domain, token, and key authorization must be non-empty"));
        }
        self.entries.insert((domain.to_string(), token.to_string()), key_auth.to_string());
        Ok(())
    }

    fn get_challenge_data(&self, host: &str, token: &str) -> Option<String> {
        let host = crate::core::router::normalize_host(host);
        self.entries.get(&(host, token.to_string())).map(|entry| entry.value().clone())
    }

    fn clear_challenge_data(&self, domain: &str, token: &str) {
        self.entries.remove(&(domain.to_string(), token.to_string()));
    }
}

async fn serve_challenge(
    State(store): State<Arc<HttpChallengeStore>>,
    headers: axum::http::HeaderMap,
    Path(token): Path<String>,
) -> Response {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    match store.get_challenge_data(host, &token) {
        Some(key_auth) => ([("content-type", "text/plain")], key_auth).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Builds the `/.well-known/acme-challenge/{token}` route. `axum::routing::get`
/// already rejects non-GET methods with 405, so only the 404 branch needs
/// handling here.
pub fn challenge_router(store: Arc<HttpChallengeStore>) -> Router {
    Router::new().route("/.well-known/acme-challenge/{token}", get(serve_challenge)).with_state(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn rejects_empty_fields() {
        let store = HttpChallengeStore::new();
        assert!(store.set_challenge_data("", "token", "auth").is_err());
        assert!(store.set_challenge_data("example.com", "", "auth").is_err());
        assert!(store.set_challenge_data("example.com", "token", "").is_err());
    }

    #[test]
    fn stores_and_clears_by_domain_and_token() {
        let store = HttpChallengeStore::new();
        store.set_challenge_data("example.com", "tok1", "keyauth1").unwrap();
        assert_eq!(store.get_challenge_data("example.com", "tok1"), Some("keyauth1".to_string()));
        store.clear_challenge_data("example.com", "tok1");
        assert_eq!(store.get_challenge_data("example.com", "tok1"), None);
    }

    #[test]
    fn lookup_normalizes_host_port() {
        let store = HttpChallengeStore::new();
        store.set_challenge_data("example.com", "tok1", "keyauth1").unwrap();
        assert_eq!(store.get_challenge_data("Example.com:443", "tok1"), Some("keyauth1".to_string()));
    }

    #[tokio::test]
    async fn route_returns_key_auth_on_match() {
        let store = Arc::new(HttpChallengeStore::new());
        store.set_challenge_data("example.com", "tok1", "keyauth1").unwrap();
        let router = challenge_router(store);
        let request = Request::builder()
            .method("GET")
            .uri("/.well-known/acme-challenge/tok1")
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn route_returns_404_for_unknown_token() {
        let store = Arc::new(HttpChallengeStore::new());
        let router = challenge_router(store);
        let request = Request::builder()
            .method("GET")
            .uri("/.well-known/acme-challenge/missing")
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn route_rejects_non_get_methods() {
        let store = Arc::new(HttpChallengeStore::new());
        let router = challenge_router(store);
        let request = Request::builder()
            .method("POST")
            .uri("/.well-known/acme-challenge/tok1")
            .header("host", "example.com")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
