use tokio::signal::ctrl_c;
#[cfg(not(target_os = "windows"))]
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
};

#[cfg(not(target_os = "windows"))]
pub async fn graceful_shutdown() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable, waiting for SIGINT only");
            wait_for_ctrl_c().await;
            return;
        }
    };
    select! {
        _ = terminate.recv() => {
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = wait_for_ctrl_c() => {}
    }
}

#[cfg(target_os = "windows")]
pub async fn graceful_shutdown() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match ctrl_c().await {
        Ok(()) => tracing::info!("Received SIGINT, shutting down"),
        Err(e) => tracing::error!(error = %e, "failed to listen for SIGINT"),
    }
}
