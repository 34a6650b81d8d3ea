//! Observability contracts: structured logger, metrics recorder, and
//! request-scoped context carriers. The core depends on the traits here,
//! never on `tracing`/`metrics` directly.
pub mod context;
pub mod logging;
pub mod metrics;

pub use context::{accept_or_generate, generate_request_id};
pub use logging::{init_tracing, Level, Logger, TracingLogger};
pub use metrics::{install_exporter, MetricsRecorder, PrometheusRecorder, RequestTimer};
