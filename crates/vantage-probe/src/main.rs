//! Vantage probe binary
//!
//! Diagnostics go to stderr; stdout carries frames only (plus whatever the
//! surrounding tooling writes to it).

use anyhow::Result;
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vantage_probe::{Cli, ProbeConfig, SessionLoop};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::parse().into_config();
    info!("Starting Vantage probe");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(config));
    // A pending stdin read cannot be cancelled; do not wait for it.
    runtime.shutdown_background();

    if let Err(e) = result {
        error!("Probe error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: ProbeConfig) -> Result<()> {
    let mut session = SessionLoop::new(config)?;
    if let Some(shutdown_tx) = session.shutdown_sender() {
        tokio::spawn(forward_termination(shutdown_tx));
    }
    session.run().await
}

/// Turn SIGINT/SIGTERM into a graceful session shutdown
async fn forward_termination(shutdown_tx: oneshot::Sender<()>) {
    wait_for_termination().await;
    info!("Termination requested");
    let _ = shutdown_tx.send(());
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}
