use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Detects signals sent to the process: ctrl-c everywhere, and SIGTERM on unix which is what
/// `glass shutdown` sends.
///
/// On Windows detached processes can't detect signals sent to them, so there the daemon is
/// terminated forcefully and relies on periodic snapshots.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => info!("Received ctrl-c"),
        _ = terminate() => info!("Received terminate signal"),
        _ = cancelation.cancelled() => return,
    };
    cancelation.cancel();
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            error!("Can't listen for SIGTERM {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
