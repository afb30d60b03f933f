use std::sync::Arc;

use feed_core::{
    ConsumerChannels, ConsumerOutcome, DEFAULT_EVENT_BUFFER, FeedError, FeedErrorCategory,
    LifecycleStream, RetryPolicies, StopReason, SubscriptionFilter,
};
use feed_platform::{CheckpointStore, InMemoryCheckpointStore};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    checkpoint::Checkpointer, handler::EventHandler, scheduler::ReconnectScheduler,
    source::ChangeFeedSource,
};

const DEFAULT_CONSUMER_NAME: &str = "default";

/// Tuning for one consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Key under which the checkpoint is persisted.
    pub name: String,
    /// Retry policy per disposition.
    pub retry: RetryPolicies,
    /// Capacity of the lifecycle broadcast buffer.
    pub event_buffer: usize,
}

impl ConsumerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CONSUMER_NAME.to_owned(),
            retry: RetryPolicies::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

struct RunningScheduler {
    stop: CancellationToken,
    outcome: watch::Receiver<Option<ConsumerOutcome>>,
    task: JoinHandle<()>,
}

/// Owner-facing handle of a change-feed consumer.
///
/// `start` spawns the reconnect loop, `stop` cancels it and waits until the
/// active session is closed. Several consumers can share one source.
pub struct FeedConsumer<S: ChangeFeedSource + ?Sized + 'static> {
    source: Arc<S>,
    filter: SubscriptionFilter,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    checkpoints: Arc<dyn CheckpointStore>,
    channels: ConsumerChannels,
    running: Mutex<Option<RunningScheduler>>,
    finished: Mutex<Option<ConsumerOutcome>>,
}

impl<S: ChangeFeedSource + ?Sized + 'static> FeedConsumer<S> {
    pub fn new(
        source: Arc<S>,
        filter: SubscriptionFilter,
        handler: impl EventHandler + 'static,
        config: ConsumerConfig,
    ) -> Self {
        let channels = ConsumerChannels::new(config.event_buffer);
        Self {
            source,
            filter,
            handler: Arc::new(handler),
            config,
            checkpoints: Arc::new(InMemoryCheckpointStore::default()),
            channels,
            running: Mutex::new(None),
            finished: Mutex::new(None),
        }
    }

    /// Persist checkpoints in `store` instead of process memory.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = store;
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Subscribe to lifecycle events of this consumer.
    pub fn subscribe(&self) -> LifecycleStream {
        self.channels.subscribe()
    }

    pub async fn start(&self) -> Result<(), FeedError> {
        let mut guard = self.running.lock().await;
        if let Some(running) = guard.as_ref()
            && running.outcome.borrow().is_none()
        {
            return Err(FeedError::new(
                FeedErrorCategory::Internal,
                "consumer_already_running",
                "consumer is already running",
            ));
        }

        let store = self.checkpoints.clone();
        let name = self.config.name.clone();
        let source = self.source.clone();
        let filter = self.filter.clone();
        let handler = self.handler.clone();
        let retry = self.config.retry;
        let channels = self.channels.clone();

        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let task = tokio::spawn(async move {
            let checkpoint = Checkpointer::load(store, name).await;
            let scheduler =
                ReconnectScheduler::new(source, filter, handler, retry, checkpoint, channels);
            let outcome = scheduler.run(stop_child).await;
            let _ = outcome_tx.send(Some(outcome));
        });

        info!(
            consumer = %self.config.name,
            collection = %self.filter.collection,
            "change feed consumer started"
        );
        *self.finished.lock().await = None;
        *guard = Some(RunningScheduler {
            stop,
            outcome: outcome_rx,
            task,
        });
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| running.outcome.borrow().is_none())
    }

    /// Stop consuming and wait until the active session is closed.
    ///
    /// Idempotent and safe to call concurrently: every caller returns only
    /// after the reconnect loop has finished, with the same outcome. Returns
    /// `None` if the consumer never started.
    pub async fn stop(&self) -> Option<ConsumerOutcome> {
        let outcome_rx = {
            let guard = self.running.lock().await;
            match guard.as_ref() {
                Some(running) => {
                    running.stop.cancel();
                    running.outcome.clone()
                }
                None => return self.finished.lock().await.clone(),
            }
        };
        Some(self.settle(outcome_rx).await)
    }

    /// Wait for the consumer to stop on its own (fatal error) or through
    /// [`FeedConsumer::stop`].
    pub async fn wait(&self) -> Option<ConsumerOutcome> {
        let outcome_rx = {
            let guard = self.running.lock().await;
            guard.as_ref().map(|running| running.outcome.clone())
        };
        match outcome_rx {
            Some(outcome_rx) => Some(self.settle(outcome_rx).await),
            None => self.finished.lock().await.clone(),
        }
    }

    /// Wait for the run behind `outcome_rx` to report, then reap its task.
    /// Only the first caller joins the task; the rest read the same outcome.
    async fn settle(
        &self,
        mut outcome_rx: watch::Receiver<Option<ConsumerOutcome>>,
    ) -> ConsumerOutcome {
        let reported = match outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        let finished_run = self
            .running
            .lock()
            .await
            .take_if(|running| running.outcome.same_channel(&outcome_rx));
        if let Some(running) = finished_run
            && let Err(err) = running.task.await
        {
            error!(consumer = %self.config.name, error = %err, "reconnect loop task failed");
        }

        let outcome = reported.unwrap_or_else(|| ConsumerOutcome {
            reason: StopReason::Fatal(FeedError::new(
                FeedErrorCategory::Internal,
                "reconnect_loop_aborted",
                "reconnect loop ended without reporting an outcome",
            )),
            checkpoint: None,
            sessions_opened: 0,
        });
        *self.finished.lock().await = Some(outcome.clone());
        outcome
    }
}
