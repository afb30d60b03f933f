use feed_core::{FeedPosition, SessionEnd, StoreError, SubscriptionFilter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    checkpoint::Checkpointer,
    handler::EventHandler,
    source::{ChangeFeedSource, EventStream, StreamItem},
};

/// One live subscription.
///
/// Owned by the scheduler and replaced on every reconnect. Subscribe failures
/// are returned as-is; retrying is the scheduler's job.
pub struct FeedSession {
    id: Uuid,
    resume_from: Option<FeedPosition>,
    stream: Option<Box<dyn EventStream>>,
    events_processed: u64,
}

impl FeedSession {
    pub async fn open<S>(
        source: &S,
        filter: &SubscriptionFilter,
        resume_from: Option<FeedPosition>,
    ) -> Result<Self, StoreError>
    where
        S: ChangeFeedSource + ?Sized,
    {
        let stream = source.subscribe(filter, resume_from.as_ref()).await?;
        let id = Uuid::new_v4();
        info!(
            session_id = %id,
            collection = %filter.collection,
            resume_from = resume_from.as_ref().map(FeedPosition::as_str),
            "change feed session opened"
        );

        Ok(Self {
            id,
            resume_from,
            stream: Some(stream),
            events_processed: 0,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn resume_from(&self) -> Option<&FeedPosition> {
        self.resume_from.as_ref()
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Forward events to `handler` until the stream ends, the handler fails,
    /// or `stop` fires. The stream is closed before this returns.
    ///
    /// The checkpoint advances only after the handler accepted an event. A
    /// stop request never interrupts a handler call in progress.
    pub async fn run(
        &mut self,
        handler: &dyn EventHandler,
        checkpoint: &mut Checkpointer,
        stop: &CancellationToken,
    ) -> SessionEnd {
        loop {
            let item = {
                let Some(stream) = self.stream.as_mut() else {
                    return SessionEnd::Closed;
                };
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => None,
                    item = stream.next() => Some(item),
                }
            };

            let end = match item {
                None => SessionEnd::Cancelled,
                Some(StreamItem::Event(event)) => match handler.handle(&event).await {
                    Ok(()) => {
                        self.events_processed += 1;
                        checkpoint.advance(event.position).await;
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            session_id = %self.id,
                            position = %event.position,
                            error = %err,
                            "event callback failed; checkpoint not advanced"
                        );
                        SessionEnd::HandlerFailed(err)
                    }
                },
                Some(StreamItem::Error(err)) => {
                    debug!(session_id = %self.id, error = %err, "change stream failed");
                    SessionEnd::Failed(err)
                }
                Some(StreamItem::Closed) => {
                    debug!(session_id = %self.id, "change stream closed by store");
                    SessionEnd::Closed
                }
            };

            self.close().await;
            return end;
        }
    }

    /// Close the underlying stream. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.close().await;
            info!(
                session_id = %self.id,
                events_processed = self.events_processed,
                "change feed session closed"
            );
        }
    }
}
