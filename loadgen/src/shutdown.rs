//! Graceful shutdown on process signals.
//!
//! Signals are handled by [`elegant_departure`]. Once shutdown is initiated, [`propagate`] turns
//! it into a cancelled [`CancellationToken`], which every worker and the reporter observe.

use std::future::Future;

use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;

/// Waits for a termination signal and initiates shutdown.
///
/// Resolves once every shutdown guard has been released. The signal handlers stay installed
/// afterwards, so repeated signals during the drain are ignored instead of killing the process.
pub async fn on_signal() {
    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit())
        .await;
}

/// Cancels `cancel` once shutdown has been initiated.
///
/// The shutdown guard is acquired when this function is called rather than when the returned
/// future is first polled, so a signal arriving in between is not missed.
pub fn propagate(cancel: CancellationToken) -> impl Future<Output = ()> + Send + 'static {
    let guard = elegant_departure::get_shutdown_guard();

    async move {
        guard.wait().await;
        tracing::info!("received shutdown signal, exiting...");
        cancel.cancel();
    }
}
