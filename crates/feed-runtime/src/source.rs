use async_trait::async_trait;
use feed_core::{ChangeEvent, FeedPosition, StoreError, SubscriptionFilter};
use futures::{Stream, StreamExt};

/// One item received from an open change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A committed change, in store order.
    Event(ChangeEvent),
    /// The stream failed. No further items follow.
    Error(StoreError),
    /// The stream ended without an error. No further items follow.
    Closed,
}

/// A live subscription handle returned by [`ChangeFeedSource::subscribe`].
#[async_trait]
pub trait EventStream: Send {
    /// Wait for the next item. After `Error` or `Closed`, keeps returning
    /// `Closed`.
    async fn next(&mut self) -> StreamItem;

    /// Release the subscription. Closing twice is a no-op.
    async fn close(&mut self);
}

/// The data store's change-feed transport.
#[async_trait]
pub trait ChangeFeedSource: Send + Sync {
    /// Open a subscription matching `filter`, starting right after
    /// `resume_from` or at the start of retained history when `None`.
    async fn subscribe(
        &self,
        filter: &SubscriptionFilter,
        resume_from: Option<&FeedPosition>,
    ) -> Result<Box<dyn EventStream>, StoreError>;

    /// Release the underlying connection. Disconnecting twice is a no-op.
    async fn disconnect(&self);
}

/// Adapts any `Stream` of results into an [`EventStream`].
///
/// Stream exhaustion is reported as a clean close.
pub struct StreamAdapter<St> {
    inner: Option<St>,
}

impl<St> StreamAdapter<St> {
    pub fn new(inner: St) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

#[async_trait]
impl<St> EventStream for StreamAdapter<St>
where
    St: Stream<Item = Result<ChangeEvent, StoreError>> + Send + Unpin,
{
    async fn next(&mut self) -> StreamItem {
        let Some(inner) = self.inner.as_mut() else {
            return StreamItem::Closed;
        };

        match inner.next().await {
            Some(Ok(event)) => StreamItem::Event(event),
            Some(Err(err)) => {
                self.inner = None;
                StreamItem::Error(err)
            }
            None => {
                self.inner = None;
                StreamItem::Closed
            }
        }
    }

    async fn close(&mut self) {
        self.inner = None;
    }
}

#[cfg(test)]
mod tests {
    use feed_core::{OperationType, StoreErrorKind};
    use futures::stream;

    use super::*;

    fn event(token: &str) -> ChangeEvent {
        ChangeEvent::new(OperationType::Insert, FeedPosition::new(token), "orders")
    }

    #[tokio::test]
    async fn adapter_reports_exhaustion_as_clean_close() {
        let mut adapter = StreamAdapter::new(stream::iter(vec![Ok::<_, StoreError>(event("a"))]));

        assert_eq!(adapter.next().await, StreamItem::Event(event("a")));
        assert_eq!(adapter.next().await, StreamItem::Closed);
        assert!(adapter.is_closed());
        assert_eq!(adapter.next().await, StreamItem::Closed);
    }

    #[tokio::test]
    async fn adapter_stops_after_error() {
        let err = StoreError::new(StoreErrorKind::NetworkTimeout, "timed out");
        let mut adapter = StreamAdapter::new(stream::iter(vec![
            Err(err.clone()),
            Ok(event("never")),
        ]));

        assert_eq!(adapter.next().await, StreamItem::Error(err));
        assert_eq!(adapter.next().await, StreamItem::Closed);
    }

    #[tokio::test]
    async fn adapter_close_is_idempotent() {
        let mut adapter = StreamAdapter::new(stream::iter(vec![Ok::<_, StoreError>(event("a"))]));
        adapter.close().await;
        adapter.close().await;
        assert_eq!(adapter.next().await, StreamItem::Closed);
    }
}
