//! Structured logger contract and its `tracing`-backed implementation.
use std::collections::HashMap;

/// Severity levels the core reasons about; kept independent of whichever
/// logging crate backs the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// `Logger` is the port the core depends on for structured, leveled
/// logging. Implementations must not panic and must not block the caller
/// on I/O beyond what the underlying writer does synchronously.
pub trait Logger: Send + Sync + 'static {
    fn log(&self, level: Level, message: &str, fields: &[(&str, &str)]);

    fn debug(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Level::Debug, message, fields);
    }
    fn info(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Level::Info, message, fields);
    }
    fn warn(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Level::Warn, message, fields);
    }
    fn error(&self, message: &str, fields: &[(&str, &str)]) {
        self.log(Level::Error, message, fields);
    }
}

/// The production `Logger` adapter, backed by the `tracing` facade. Actual
/// subscriber wiring (JSON vs. pretty, env-filter) happens once at startup
/// in [`init_tracing`]; this type just satisfies the port so core code
/// never calls `tracing::` macros directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: &[(&str, &str)]) {
        let mut rendered = HashMap::with_capacity(fields.len());
        for (k, v) in fields {
            rendered.insert(*k, *v);
        }
        match level {
            Level::Debug => tracing::debug!(?rendered, "{}", message),
            Level::Info => tracing::info!(?rendered, "{}", message),
            Level::Warn => tracing::warn!(?rendered, "{}", message),
            Level::Error => tracing::error!(?rendered, "{}", message),
        }
    }
}

/// Initializes the global `tracing` subscriber: JSON output with span
/// information by default, switchable to a human-readable layer for local
/// development via `RWWWRSE_LOG_FORMAT=pretty`.
pub fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

    let pretty = std::env::var("RWWWRSE_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("pretty"))
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if pretty {
        Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(true),
            )
            .try_init()?;
    }

    tracing::info!("structured logging initialized");
    Ok(())
}
