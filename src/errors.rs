//! Typed error taxonomy with HTTP-status mapping and retryability predicates.
use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Stable, wire-visible error discriminants. The string form (via `Display`)
/// is embedded in JSON error bodies and log lines and must not change
/// without a deliberate compatibility decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyErrorKind {
    BackendUnavailable,
    BackendTimeout,
    BackendConnectionFailed,
    BackendInvalidResponse,
    InvalidHost,
    HostNotConfigured,
    RoutingFailed,
    TlsHandshake,
    CertNotFound,
    CertExpired,
    CertInvalid,
    RateLimited,
    AccessDenied,
    InvalidOrigin,
    ConfigInvalid,
    ConfigMissing,
    ConfigValidation,
    HealthCheckFailed,
    HealthCheckTimeout,
    CircuitBreakerOpen,
    RequestInvalid,
    RequestTooLarge,
    RequestTimeout,
    InternalError,
    ServiceUnavailable,
    NotImplemented,
}

impl ProxyErrorKind {
    /// Default HTTP status code for this kind, per the spec's error table.
    pub fn status(self) -> StatusCode {
        use ProxyErrorKind::*;
        match self {
            BackendUnavailable => StatusCode::BAD_GATEWAY,
            BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
            BackendConnectionFailed => StatusCode::BAD_GATEWAY,
            BackendInvalidResponse => StatusCode::BAD_REQUEST,
            InvalidHost => StatusCode::NOT_FOUND,
            HostNotConfigured => StatusCode::NOT_FOUND,
            RoutingFailed => StatusCode::INTERNAL_SERVER_ERROR,
            TlsHandshake => StatusCode::BAD_GATEWAY,
            CertNotFound => StatusCode::BAD_GATEWAY,
            CertExpired => StatusCode::BAD_GATEWAY,
            CertInvalid => StatusCode::BAD_GATEWAY,
            RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AccessDenied => StatusCode::FORBIDDEN,
            InvalidOrigin => StatusCode::FORBIDDEN,
            ConfigInvalid => StatusCode::INTERNAL_SERVER_ERROR,
            ConfigMissing => StatusCode::INTERNAL_SERVER_ERROR,
            ConfigValidation => StatusCode::INTERNAL_SERVER_ERROR,
            HealthCheckFailed => StatusCode::INTERNAL_SERVER_ERROR,
            HealthCheckTimeout => StatusCode::GATEWAY_TIMEOUT,
            CircuitBreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            RequestInvalid => StatusCode::BAD_REQUEST,
            RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Whether a caller may reasonably retry the same request unmodified.
    pub fn retryable(self) -> bool {
        use ProxyErrorKind::*;
        matches!(
            self,
            BackendUnavailable
                | BackendTimeout
                | BackendConnectionFailed
                | HealthCheckTimeout
                | CircuitBreakerOpen
                | RequestTimeout
                | ServiceUnavailable
        )
    }
}

impl fmt::Display for ProxyErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProxyErrorKind::BackendUnavailable => "backend_unavailable",
            ProxyErrorKind::BackendTimeout => "backend_timeout",
            ProxyErrorKind::BackendConnectionFailed => "backend_connection_failed",
            ProxyErrorKind::BackendInvalidResponse => "backend_invalid_response",
            ProxyErrorKind::InvalidHost => "invalid_host",
            ProxyErrorKind::HostNotConfigured => "host_not_configured",
            ProxyErrorKind::RoutingFailed => "routing_failed",
            ProxyErrorKind::TlsHandshake => "tls_handshake",
            ProxyErrorKind::CertNotFound => "cert_not_found",
            ProxyErrorKind::CertExpired => "cert_expired",
            ProxyErrorKind::CertInvalid => "cert_invalid",
            ProxyErrorKind::RateLimited => "rate_limited",
            ProxyErrorKind::AccessDenied => "access_denied",
            ProxyErrorKind::InvalidOrigin => "invalid_origin",
            ProxyErrorKind::ConfigInvalid => "config_invalid",
            ProxyErrorKind::ConfigMissing => "config_missing",
            ProxyErrorKind::ConfigValidation => "config_validation",
            ProxyErrorKind::HealthCheckFailed => "health_check_failed",
            ProxyErrorKind::HealthCheckTimeout => "health_check_timeout",
            ProxyErrorKind::CircuitBreakerOpen => "circuit_breaker_open",
            ProxyErrorKind::RequestInvalid => "request_invalid",
            ProxyErrorKind::RequestTooLarge => "request_too_large",
            ProxyErrorKind::RequestTimeout => "request_timeout",
            ProxyErrorKind::InternalError => "internal_error",
            ProxyErrorKind::ServiceUnavailable => "service_unavailable",
            ProxyErrorKind::NotImplemented => "not_implemented",
        };
        f.write_str(s)
    }
}

/// The crate-wide error type. Carries a kind, a human message, an optional
/// wrapped cause, and an attribute bag for structured log/response context.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct ProxyError {
    pub kind: ProxyErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    pub attributes: HashMap<String, String>,
}

impl ProxyError {
    pub fn new(kind: ProxyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

macro_rules! ctor {
    ($name:ident, $kind:ident) => {
        pub fn $name(message: impl Into<String>) -> Self {
            Self::new(ProxyErrorKind::$kind, message)
        }
    };
}

impl ProxyError {
    ctor!(backend_unavailable, BackendUnavailable);
    ctor!(backend_timeout, BackendTimeout);
    ctor!(backend_connection_failed, BackendConnectionFailed);
    ctor!(backend_invalid_response, BackendInvalidResponse);
    ctor!(invalid_host, InvalidHost);
    ctor!(host_not_configured, HostNotConfigured);
    ctor!(routing_failed, RoutingFailed);
    ctor!(tls_handshake, TlsHandshake);
    ctor!(cert_not_found, CertNotFound);
    ctor!(cert_expired, CertExpired);
    ctor!(cert_invalid, CertInvalid);
    ctor!(rate_limited, RateLimited);
    ctor!(access_denied, AccessDenied);
    ctor!(invalid_origin, InvalidOrigin);
    ctor!(config_invalid, ConfigInvalid);
    ctor!(config_missing, ConfigMissing);
    ctor!(config_validation, ConfigValidation);
    ctor!(health_check_failed, HealthCheckFailed);
    ctor!(health_check_timeout, HealthCheckTimeout);
    ctor!(circuit_breaker_open, CircuitBreakerOpen);
    ctor!(request_invalid, RequestInvalid);
    ctor!(request_too_large, RequestTooLarge);
    ctor!(request_timeout, RequestTimeout);
    ctor!(internal_error, InternalError);
    ctor!(service_unavailable, ServiceUnavailable);
    ctor!(not_implemented, NotImplemented);
}

/// The JSON body rendered for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    /// Decimal status code text. Rendering this as an integer (not a char
    /// cast of the code) is deliberate: the source this crate supersedes
    /// rendered HTTP status via a rune conversion and produced malformed
    /// JSON for any status outside the printable-ASCII range.
    pub status: u16,
    pub request_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, String>>,
}

impl ErrorBody {
    pub fn from_error(err: &ProxyError, request_id: &str) -> Self {
        Self {
            error: err.message.clone(),
            status: err.status().as_u16(),
            request_id: request_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            context: if err.attributes.is_empty() {
                None
            } else {
                Some(err.attributes.clone())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_spec_table() {
        assert_eq!(ProxyErrorKind::BackendUnavailable.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyErrorKind::BackendTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ProxyErrorKind::InvalidHost.status(), StatusCode::NOT_FOUND);
        assert_eq!(ProxyErrorKind::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ProxyErrorKind::CircuitBreakerOpen.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ProxyErrorKind::RequestTooLarge.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ProxyErrorKind::NotImplemented.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn retryability_matches_spec_table() {
        assert!(ProxyErrorKind::BackendUnavailable.retryable());
        assert!(ProxyErrorKind::CircuitBreakerOpen.retryable());
        assert!(!ProxyErrorKind::InvalidHost.retryable());
        assert!(!ProxyErrorKind::ConfigInvalid.retryable());
        assert!(ProxyErrorKind::RequestTimeout.retryable());
        assert!(!ProxyErrorKind::RequestInvalid.retryable());
    }

    #[test]
    fn error_body_renders_decimal_status_not_rune() {
        let err = ProxyError::host_not_configured("unknown host: unknown.example.com");
        let body = ErrorBody::from_error(&err, "deadbeefdeadbeefdeadbeefdeadbeef");
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"status\":404"));
        assert!(!json.contains("\"status\":\""));
    }

    #[test]
    fn attributes_surface_as_context() {
        let err = ProxyError::backend_unavailable("no healthy backend")
            .with_attr("host", "api.example.com");
        let body = ErrorBody::from_error(&err, "id");
        assert_eq!(
            body.context.unwrap().get("host").map(String::as_str),
            Some("api.example.com")
        );
    }
}
