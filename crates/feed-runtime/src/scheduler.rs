use std::sync::Arc;

use feed_core::{
    ConsumerChannels, ConsumerEvent, ConsumerOutcome, ConsumerStateMachine, Disposition,
    FeedError, FeedErrorCategory, RetryPolicies, SessionEnd, StopReason, SubscriptionFilter,
    classify, normalize_session_end,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    checkpoint::Checkpointer, handler::EventHandler, session::FeedSession,
    source::ChangeFeedSource,
};

/// Why the previous connection attempt or session ended.
struct Recovery {
    disposition: Disposition,
    cause: Option<FeedError>,
}

/// Supervisory reconnect loop for one consumer.
///
/// Opens one [`FeedSession`] at a time, classifies how it ended, and either
/// resubscribes from the checkpoint after the policy's delay or stops.
pub struct ReconnectScheduler<S: ChangeFeedSource + ?Sized> {
    source: Arc<S>,
    filter: SubscriptionFilter,
    handler: Arc<dyn EventHandler>,
    policies: RetryPolicies,
    checkpoint: Checkpointer,
    channels: ConsumerChannels,
    state_machine: ConsumerStateMachine,
    sessions_opened: u32,
}

impl<S: ChangeFeedSource + ?Sized> ReconnectScheduler<S> {
    pub fn new(
        source: Arc<S>,
        filter: SubscriptionFilter,
        handler: Arc<dyn EventHandler>,
        policies: RetryPolicies,
        checkpoint: Checkpointer,
        channels: ConsumerChannels,
    ) -> Self {
        Self {
            source,
            filter,
            handler,
            policies,
            checkpoint,
            channels,
            state_machine: ConsumerStateMachine::default(),
            sessions_opened: 0,
        }
    }

    /// Run until a fatal failure or until `stop` is cancelled.
    ///
    /// Any open session is closed before this returns.
    pub async fn run(mut self, stop: CancellationToken) -> ConsumerOutcome {
        self.transition(ConsumerStateMachine::on_start);
        let mut attempt: u32 = 0;

        let reason = loop {
            if stop.is_cancelled() {
                break StopReason::Shutdown;
            }

            let resume_from = self.checkpoint.current().cloned();
            let open = FeedSession::open(self.source.as_ref(), &self.filter, resume_from);
            let opened = tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                opened = open => Some(opened),
            };

            let recovery = match opened {
                None => break StopReason::Shutdown,
                Some(Err(err)) => {
                    warn!(
                        collection = %self.filter.collection,
                        error = %err,
                        "change feed subscribe failed"
                    );
                    self.transition(ConsumerStateMachine::on_subscribe_failed);
                    Recovery {
                        disposition: classify(&err),
                        cause: Some(FeedError::from(err)),
                    }
                }
                Some(Ok(mut session)) => {
                    self.sessions_opened = self.sessions_opened.saturating_add(1);
                    self.transition(ConsumerStateMachine::on_subscribed);
                    self.channels.emit(ConsumerEvent::SessionOpened {
                        session_id: session.id().to_string(),
                        resume_from: session.resume_from().cloned(),
                    });

                    let end = session
                        .run(self.handler.as_ref(), &mut self.checkpoint, &stop)
                        .await;
                    session.close().await;

                    self.transition(ConsumerStateMachine::on_session_ended);
                    self.channels.emit(normalize_session_end(
                        session.id().to_string(),
                        session.events_processed(),
                        &end,
                    ));
                    if session.events_processed() > 0 {
                        attempt = 0;
                    }

                    let Some(disposition) = end.disposition() else {
                        break StopReason::Shutdown;
                    };
                    if matches!(end, SessionEnd::Closed) {
                        info!("change stream closed by store; resuming");
                    }
                    Recovery {
                        disposition,
                        cause: end.error(),
                    }
                }
            };

            match recovery.disposition {
                Disposition::Fatal => {
                    let cause = recovery.cause.unwrap_or_else(|| {
                        FeedError::new(
                            FeedErrorCategory::Internal,
                            "fatal_without_cause",
                            "session ended fatally without reporting a cause",
                        )
                    });
                    error!(
                        code = %cause.code,
                        error = %cause,
                        checkpoint = self.checkpoint.current().map(|p| p.as_str()),
                        "change feed consumer stopping on fatal error"
                    );
                    break StopReason::Fatal(cause);
                }
                Disposition::HistoryLost => {
                    let discarded = self.checkpoint.reset().await;
                    warn!(
                        collection = %self.filter.collection,
                        discarded = discarded.as_ref().map(|p| p.as_str()),
                        "resume position no longer in store history; resyncing from the start, events may be skipped or repeated"
                    );
                    self.channels.emit(ConsumerEvent::HistoryLost { discarded });
                }
                Disposition::Transient => {
                    debug!(
                        cause = recovery.cause.as_ref().map(|err| err.code.as_str()),
                        "transient change feed interruption"
                    );
                }
            }

            let retry_after_ms = recovery.cause.as_ref().and_then(|err| err.retry_after_ms);
            let delay = self
                .policies
                .for_disposition(recovery.disposition)
                .and_then(|policy| policy.next_delay(attempt, retry_after_ms));
            let Some(delay) = delay else {
                let cause = FeedError::retry_budget_exhausted(attempt, recovery.cause.as_ref());
                error!(error = %cause, "change feed consumer giving up");
                break StopReason::Fatal(cause);
            };
            attempt = attempt.saturating_add(1);

            let resume_from = self.checkpoint.current().cloned();
            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                resume_from = resume_from.as_ref().map(|p| p.as_str()),
                "resubscribing after delay"
            );
            self.channels.emit(ConsumerEvent::RetryScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
                resume_from,
            });

            tokio::select! {
                biased;
                _ = stop.cancelled() => break StopReason::Shutdown,
                _ = tokio::time::sleep(delay) => {}
            }
            self.transition(ConsumerStateMachine::on_retry);
        };

        if let Some(event) = self.state_machine.on_stop() {
            self.channels.emit(event);
        }
        let outcome = ConsumerOutcome {
            reason,
            checkpoint: self.checkpoint.into_position(),
            sessions_opened: self.sessions_opened,
        };
        info!(
            sessions_opened = outcome.sessions_opened,
            fatal = outcome.is_fatal(),
            "change feed consumer stopped"
        );
        self.channels.emit(ConsumerEvent::Stopped(outcome.clone()));
        outcome
    }

    fn transition<F>(&mut self, apply: F)
    where
        F: FnOnce(&mut ConsumerStateMachine) -> Result<ConsumerEvent, FeedError>,
    {
        match apply(&mut self.state_machine) {
            Ok(event) => self.channels.emit(event),
            Err(err) => error!(error = %err, "reconnect loop state machine rejected transition"),
        }
    }
}
