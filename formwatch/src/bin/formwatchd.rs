//! Form-status monitor daemon.

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use formwatch::config::Config;
use formwatch::daemon;
use formwatch::tracing::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    formwatch::tracing::init_journald_or_stdout();

    let config = Config::from_env()?;
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        signal.cancel();
    });

    daemon::run(config, shutdown).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
