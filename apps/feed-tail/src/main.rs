mod config;
mod demo;

use std::{process::ExitCode, sync::Arc};

use feed_core::{ChangeEvent, ConsumerEvent, ConsumerOutcome, HandlerError, StopReason};
use feed_platform::{CheckpointStore, InMemoryCheckpointStore, JsonFileCheckpointStore};
use feed_runtime::{FeedConsumer, ShutdownCoordinator, handler_fn};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::TailConfig;

const DEFAULT_LOG_FILTER: &str = "info,feed_tail=debug,feed_runtime=debug";

/// `RUST_LOG` first, then `FEED_TAIL_LOG`, then the built-in filter. Logs go
/// to stderr; stdout carries only events.
fn init_tracing(log_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| log_filter.and_then(|directives| EnvFilter::try_new(directives).ok()))
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn print_event(event: &ChangeEvent) -> Result<(), HandlerError> {
    let line = serde_json::to_string(event)?;
    println!("{line}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = TailConfig::from_env();
    init_tracing(
        config
            .as_ref()
            .ok()
            .and_then(|config| config.log_filter.as_deref()),
    );
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid feed-tail configuration");
            return ExitCode::FAILURE;
        }
    };

    let checkpoints: Arc<dyn CheckpointStore> = match &config.checkpoint_path {
        Some(path) => {
            info!(path = %path.display(), "persisting checkpoints to file");
            Arc::new(JsonFileCheckpointStore::new(path.clone()))
        }
        None => Arc::new(InMemoryCheckpointStore::default()),
    };

    let source = Arc::new(demo::demo_source(&config.collection));
    let consumer = FeedConsumer::new(
        source,
        config.filter(),
        handler_fn(print_event),
        config.consumer_config(),
    )
    .with_checkpoint_store(checkpoints);

    let mut lifecycle = consumer.subscribe();
    tokio::spawn(async move {
        loop {
            match lifecycle.recv().await {
                Ok(ConsumerEvent::Stopped(_)) => break,
                Ok(event) => debug!(?event, "consumer lifecycle"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "lifecycle observer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(err) = consumer.start().await {
        error!(error = %err, "failed starting consumer");
        return ExitCode::FAILURE;
    }
    info!(
        collection = %config.collection,
        consumer = %config.consumer_name,
        "tailing change feed; press Ctrl-C to stop"
    );

    let coordinator = ShutdownCoordinator::new();
    match coordinator.run_until_shutdown(&consumer).await {
        Some(ConsumerOutcome {
            reason: StopReason::Fatal(cause),
            checkpoint,
            ..
        }) => {
            error!(
                code = %cause.code,
                error = %cause,
                checkpoint = checkpoint.as_ref().map(|p| p.as_str()),
                "feed-tail stopped on a fatal error"
            );
            ExitCode::FAILURE
        }
        Some(outcome) => {
            info!(
                checkpoint = outcome.checkpoint.as_ref().map(|p| p.as_str()),
                sessions = outcome.sessions_opened,
                "feed-tail stopped"
            );
            ExitCode::SUCCESS
        }
        None => ExitCode::SUCCESS,
    }
}
