//! Scripted in-memory change feed.
//!
//! Each `subscribe` call consumes the next [`SubscriptionScript`]: either a
//! rejection or a batch of events followed by an error, a clean close, or an
//! open-ended wait. Once the scripts run out, subscriptions stay open and
//! idle. The source records every resume position it was asked for and how
//! many streams were open at once.

use std::{
    collections::VecDeque,
    future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use feed_core::{ChangeEvent, FeedPosition, StoreError, StoreErrorKind, SubscriptionFilter};
use tracing::debug;

use crate::source::{ChangeFeedSource, EventStream, StreamItem};

/// How a scripted stream ends after its events are delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptEnd {
    /// Signal a store error.
    Fail(StoreError),
    /// Close cleanly.
    Close,
    /// Stay open until the consumer closes the stream.
    HoldOpen,
}

/// Behavior of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionScript {
    /// Fail the `subscribe` call itself.
    Reject(StoreError),
    /// Deliver `events` (after filtering), then end as `end` says.
    Deliver {
        events: Vec<ChangeEvent>,
        end: ScriptEnd,
    },
}

impl SubscriptionScript {
    pub fn reject(err: StoreError) -> Self {
        Self::Reject(err)
    }

    pub fn deliver(events: Vec<ChangeEvent>, end: ScriptEnd) -> Self {
        Self::Deliver { events, end }
    }
}

#[derive(Debug, Default)]
struct StreamCounters {
    open: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct ScriptedFeedSource {
    scripts: Mutex<VecDeque<SubscriptionScript>>,
    subscribe_calls: Mutex<Vec<Option<FeedPosition>>>,
    counters: Arc<StreamCounters>,
    disconnects: AtomicUsize,
    disconnected: AtomicBool,
}

impl ScriptedFeedSource {
    pub fn new(scripts: impl IntoIterator<Item = SubscriptionScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Resume positions passed to every `subscribe` call, in call order.
    pub fn subscribe_calls(&self) -> Vec<Option<FeedPosition>> {
        self.subscribe_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Streams currently open.
    pub fn open_streams(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Highest number of streams that were open at the same time.
    pub fn peak_open_streams(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Number of times `disconnect` released the connection.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Option<SubscriptionScript> {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl ChangeFeedSource for ScriptedFeedSource {
    async fn subscribe(
        &self,
        filter: &SubscriptionFilter,
        resume_from: Option<&FeedPosition>,
    ) -> Result<Box<dyn EventStream>, StoreError> {
        self.subscribe_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(resume_from.cloned());

        if self.is_disconnected() {
            return Err(StoreError::new(
                StoreErrorKind::ClientClosed,
                "connection was closed by the client",
            ));
        }
        filter.validate()?;

        let (events, end) = match self.next_script() {
            Some(SubscriptionScript::Reject(err)) => return Err(err),
            Some(SubscriptionScript::Deliver { events, end }) => (events, end),
            None => (Vec::new(), ScriptEnd::HoldOpen),
        };

        let mut items: VecDeque<StreamItem> = events
            .into_iter()
            .filter(|event| filter.matches(event))
            .map(StreamItem::Event)
            .collect();
        let hold_open = match end {
            ScriptEnd::Fail(err) => {
                items.push_back(StreamItem::Error(err));
                false
            }
            ScriptEnd::Close => {
                items.push_back(StreamItem::Closed);
                false
            }
            ScriptEnd::HoldOpen => true,
        };

        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(open, Ordering::SeqCst);
        debug!(
            collection = %filter.collection,
            queued = items.len(),
            hold_open,
            "scripted subscription opened"
        );

        Ok(Box::new(ScriptedStream {
            items,
            hold_open,
            closed: false,
            counters: self.counters.clone(),
        }))
    }

    async fn disconnect(&self) {
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            debug!("scripted source disconnected");
        }
    }
}

struct ScriptedStream {
    items: VecDeque<StreamItem>,
    hold_open: bool,
    closed: bool,
    counters: Arc<StreamCounters>,
}

impl ScriptedStream {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl EventStream for ScriptedStream {
    async fn next(&mut self) -> StreamItem {
        if self.closed {
            return StreamItem::Closed;
        }
        match self.items.pop_front() {
            Some(StreamItem::Event(event)) => StreamItem::Event(event),
            Some(terminal) => {
                self.items.clear();
                self.hold_open = false;
                terminal
            }
            None if self.hold_open => future::pending().await,
            None => StreamItem::Closed,
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use feed_core::OperationType;

    use super::*;

    fn event(token: &str, collection: &str) -> ChangeEvent {
        ChangeEvent::new(OperationType::Insert, FeedPosition::new(token), collection)
    }

    #[tokio::test]
    async fn plays_scripts_in_order_and_records_resume_positions() {
        let source = ScriptedFeedSource::new([
            SubscriptionScript::reject(StoreError::new(StoreErrorKind::HostUnreachable, "down")),
            SubscriptionScript::deliver(vec![event("a", "orders")], ScriptEnd::Close),
        ]);
        let filter = SubscriptionFilter::new("orders");

        let err = source
            .subscribe(&filter, None)
            .await
            .err()
            .expect("first subscribe is rejected");
        assert_eq!(err.kind, StoreErrorKind::HostUnreachable);

        let resume = FeedPosition::new("z");
        let mut stream = source
            .subscribe(&filter, Some(&resume))
            .await
            .expect("second subscribe succeeds");
        assert_eq!(stream.next().await, StreamItem::Event(event("a", "orders")));
        assert_eq!(stream.next().await, StreamItem::Closed);

        assert_eq!(source.subscribe_calls(), vec![None, Some(resume)]);
    }

    #[tokio::test]
    async fn applies_filter_to_scripted_events() {
        let source = ScriptedFeedSource::new([SubscriptionScript::deliver(
            vec![event("a", "invoices"), event("b", "orders")],
            ScriptEnd::Close,
        )]);
        let mut stream = source
            .subscribe(&SubscriptionFilter::new("orders"), None)
            .await
            .expect("subscribe");

        assert_eq!(stream.next().await, StreamItem::Event(event("b", "orders")));
    }

    #[tokio::test]
    async fn tracks_open_and_peak_streams() {
        let source = ScriptedFeedSource::default();
        let filter = SubscriptionFilter::new("orders");

        let mut first = source.subscribe(&filter, None).await.expect("first");
        let second = source.subscribe(&filter, None).await.expect("second");
        assert_eq!(source.open_streams(), 2);

        first.close().await;
        first.close().await;
        drop(second);
        assert_eq!(source.open_streams(), 0);
        assert_eq!(source.peak_open_streams(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_scripts_hold_streams_open() {
        let source = ScriptedFeedSource::default();
        let mut stream = source
            .subscribe(&SubscriptionFilter::new("orders"), None)
            .await
            .expect("subscribe");

        let waited = tokio::time::timeout(Duration::from_secs(60), stream.next()).await;
        assert!(waited.is_err(), "idle stream must not yield");
    }

    #[tokio::test]
    async fn rejects_invalid_filter_and_closed_client() {
        let source = ScriptedFeedSource::default();
        let err = source
            .subscribe(&SubscriptionFilter::new(""), None)
            .await
            .err()
            .expect("blank filter is rejected");
        assert_eq!(err.kind, StoreErrorKind::InvalidFilter);

        source.disconnect().await;
        source.disconnect().await;
        assert_eq!(source.disconnects(), 1);

        let err = source
            .subscribe(&SubscriptionFilter::new("orders"), None)
            .await
            .err()
            .expect("closed client rejects subscribe");
        assert_eq!(err.kind, StoreErrorKind::ClientClosed);
    }
}
