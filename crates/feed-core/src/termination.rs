use crate::{
    error::{Disposition, FeedError, HandlerError, StoreError, classify},
    types::ConsumerEvent,
};

/// How a feed session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The store signalled an error.
    Failed(StoreError),
    /// The store closed the stream without an error.
    Closed,
    /// The consumer callback rejected an event.
    HandlerFailed(HandlerError),
    /// The owner requested a stop.
    Cancelled,
}

impl SessionEnd {
    /// Disposition for the reconnect loop. `None` for a requested stop.
    pub fn disposition(&self) -> Option<Disposition> {
        match self {
            Self::Failed(err) => Some(classify(err)),
            Self::Closed => Some(Disposition::Transient),
            Self::HandlerFailed(_) => Some(Disposition::Fatal),
            Self::Cancelled => None,
        }
    }

    /// Error describing the end, if it was caused by one.
    pub fn error(&self) -> Option<FeedError> {
        match self {
            Self::Failed(err) => Some(FeedError::from(err)),
            Self::HandlerFailed(err) => Some(FeedError::callback(err)),
            Self::Closed | Self::Cancelled => None,
        }
    }
}

/// Convert a session end into a `ConsumerEvent::SessionEnded` notification.
pub fn normalize_session_end(
    session_id: impl Into<String>,
    events_processed: u64,
    end: &SessionEnd,
) -> ConsumerEvent {
    ConsumerEvent::SessionEnded {
        session_id: session_id.into(),
        events_processed,
        disposition: end.disposition(),
        error_code: end.error().map(|err| err.code),
    }
}
