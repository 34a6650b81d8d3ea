//! Operational HTTP surface (§4.7, ambient): `/health`, `/ready`, `/live`,
//! and `/metrics`, mounted alongside the proxy fallback the same way the
//! ACME challenge route is — a small `Router` merged into the listener's
//! main router rather than a separate listener.
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;

use crate::core::health::{OverallStatus, Reporter};

async fn health(State(reporter): State<Arc<Reporter>>) -> Response {
    let report = reporter.health_report();
    let status = match report.status {
        OverallStatus::Healthy | OverallStatus::Degraded => StatusCode::OK,
        OverallStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

async fn ready(State(reporter): State<Arc<Reporter>>) -> Response {
    let report = reporter.readiness_report();
    let status = if report.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(report)).into_response()
}

async fn live(State(reporter): State<Arc<Reporter>>) -> Response {
    Json(reporter.liveness_report()).into_response()
}

async fn metrics() -> Response {
    (
        [("content-type", "text/plain; version=0.0.4")],
        crate::observability::metrics::render(),
    )
        .into_response()
}

/// Builds the `/health`, `/ready`, `/live`, `/metrics` routes. `/metrics`
/// carries no state since the Prometheus exporter is a process-global
/// singleton installed once at startup.
pub fn health_router(reporter: Arc<Reporter>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .with_state(reporter)
        .route("/metrics", get(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::health::HealthAggregator;
    use crate::ports::health::{HealthChecker, HealthEvent, HealthStatus, HealthTarget};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct FakeChecker {
        statuses: Mutex<Vec<(String, HealthStatus)>>,
    }

    impl HealthChecker for FakeChecker {
        fn register_target(&self, _target: HealthTarget) {}
        fn unregister_target(&self, _name: &str) {}
        fn get_target_status(&self, _name: &str) -> Option<HealthStatus> {
            None
        }
        fn get_all_target_status(&self) -> Vec<(String, HealthStatus)> {
            self.statuses.lock().unwrap().clone()
        }
        fn subscribe(&self) -> mpsc::Receiver<HealthEvent> {
            let (_tx, rx) = mpsc::channel(1);
            rx
        }
    }

    fn reporter_with(statuses: Vec<(String, HealthStatus)>) -> Arc<Reporter> {
        let checker = Arc::new(FakeChecker { statuses: Mutex::new(statuses) });
        Arc::new(Reporter::new(HealthAggregator::new(checker), "test"))
    }

    #[tokio::test]
    async fn health_endpoint_returns_503_when_unhealthy() {
        let mut unhealthy = HealthStatus::initial();
        unhealthy.healthy = false;
        let router = health_router(reporter_with(vec![("a".into(), unhealthy)]));
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_endpoint_returns_200_when_healthy() {
        let router = health_router(reporter_with(vec![("a".into(), HealthStatus::initial())]));
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_endpoint_returns_200_when_degraded() {
        let mut unhealthy = HealthStatus::initial();
        unhealthy.healthy = false;
        let router = health_router(reporter_with(vec![
            ("a".into(), HealthStatus::initial()),
            ("b".into(), HealthStatus::initial()),
            ("c".into(), unhealthy),
        ]));
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
