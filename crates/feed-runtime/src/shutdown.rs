use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{consumer::FeedConsumer, source::ChangeFeedSource};
use feed_core::ConsumerOutcome;

/// Turns termination requests into an orderly consumer shutdown.
///
/// Shutdown stops the reconnect loop, waits for the active session to close,
/// then disconnects the store. Every step tolerates already-closed
/// resources, so shutting down twice is harmless.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    requested: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for shutdown without waiting for an OS signal.
    pub fn request_shutdown(&self) {
        self.requested.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.is_cancelled()
    }

    /// Resolve on Ctrl-C, SIGTERM (unix), or [`ShutdownCoordinator::request_shutdown`].
    pub async fn wait_for_request(&self) {
        tokio::select! {
            _ = self.requested.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("received Ctrl-C, shutting down change feed consumer"),
                    Err(err) => warn!(error = %err, "failed listening for Ctrl-C; shutting down"),
                }
            }
            _ = terminate_signal() => {
                info!("received SIGTERM, shutting down change feed consumer");
            }
        }
        self.requested.cancel();
    }

    /// Stop `consumer`, then release its source connection.
    pub async fn shutdown<S>(&self, consumer: &FeedConsumer<S>) -> Option<ConsumerOutcome>
    where
        S: ChangeFeedSource + ?Sized + 'static,
    {
        self.requested.cancel();
        let outcome = consumer.stop().await;
        consumer.source().disconnect().await;
        info!("change feed consumer shut down; connection released");
        outcome
    }

    /// Run until a termination request arrives or the consumer stops on its
    /// own, then shut down.
    pub async fn run_until_shutdown<S>(&self, consumer: &FeedConsumer<S>) -> Option<ConsumerOutcome>
    where
        S: ChangeFeedSource + ?Sized + 'static,
    {
        tokio::select! {
            _ = self.wait_for_request() => {}
            _ = consumer.wait() => {}
        }
        self.shutdown(consumer).await
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "failed installing SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
