//! Binary entry point: parse CLI args, load config, wire the application,
//! run until a shutdown signal arrives. Grounded on the teacher's
//! `main.rs` startup sequence (parse args -> load config -> build client/
//! state -> serve) and on `utils/graceful_shutdown.rs`'s signal set
//! (SIGTERM, SIGINT, SIGUSR1 via `signal_hook_tokio`), simplified to the
//! two signals this crate actually acts on: SIGUSR1-triggered restart is
//! teacher-specific behavior with no SPEC_FULL counterpart, so it is
//! dropped rather than carried along unused.
use std::path::PathBuf;

use clap::Parser;
use futures_util::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;

use rwwwrse::{observability, Application};

#[derive(Parser, Debug)]
#[command(author, version, about = "Host-routing HTTPS reverse proxy")]
struct Args {
    /// Path to the YAML configuration file. Falls back to `RWWWRSE_CONFIG`,
    /// then `./config.yaml`.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn config_path(args: Args) -> PathBuf {
    args.config
        .or_else(|| std::env::var("RWWWRSE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    signals.next().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing()?;

    let args = Args::parse();
    let path = config_path(args);

    tracing::info!(path = %path.display(), "loading configuration");
    let config = rwwwrse::config::ConfigLoader::load(&path)?;

    let app = Application::new(config)?;
    app.start().await?;

    wait_for_shutdown_signal().await?;
    tracing::info!("shutdown signal received, draining connections");

    app.stop().await;
    Ok(())
}
