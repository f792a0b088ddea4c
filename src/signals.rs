//! Termination signals and faults.
//!
//! Ctrl-C, SIGTERM and panics all cancel the run's token. The attempt in
//! flight reacts by running its normal two-phase shutdown, so every trigger
//! ends in the same termination sequence.

use std::sync::Once;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wait for Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "Failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Cancel `cancel` when a termination signal arrives.
///
/// The listener ends on its own once the token is cancelled for any other reason.
pub fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = shutdown_signal() => {
                tracing::warn!("Termination signal received, shutting down");
                cancel.cancel();
            }
            () = cancel.cancelled() => {}
        }
    })
}

/// Route panics into `cancel` while keeping the previous hook's output.
///
/// Installed at most once per process.
pub fn install_fault_hook(cancel: CancellationToken) {
    static INSTALLED: Once = Once::new();
    INSTALLED.call_once(move || {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(fault = %info, "Unexpected fault, shutting down");
            cancel.cancel();
            previous(info);
        }));
    });
}
