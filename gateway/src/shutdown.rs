//! Completes when the process is asked to stop.
//!
//! Unix listens for SIGINT, SIGTERM and SIGQUIT; other platforms only for
//! ctrl-c.

use tracing::{info, warn};

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

pub async fn signal() {
    match wait_for_signal().await {
        Ok(name) => info!(signal = name, "shutdown requested"),
        Err(e) => {
            // Without handlers the only way out is being killed; keep serving.
            warn!(error = %e, "failed to install signal handlers");
            std::future::pending::<()>().await;
        }
    }
}
