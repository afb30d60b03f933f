use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{Disposition, FeedError, StoreError, StoreErrorKind};

/// Opaque resume position inside an ordered change feed.
///
/// Only equality is defined. The store, not the consumer, decides what comes
/// after what.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct FeedPosition(String);

impl FeedPosition {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token to hand back to the store as a resume argument.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutation kind carried by a change event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    /// The watched collection was dropped.
    Drop,
    /// The watched collection was renamed.
    Rename,
    /// The database holding the collection was dropped.
    DropDatabase,
    /// The feed became invalid and will close after this event.
    Invalidate,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Drop => "drop",
            Self::Rename => "rename",
            Self::DropDatabase => "dropDatabase",
            Self::Invalidate => "invalidate",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when an operation type name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation type '{0}'")]
pub struct UnknownOperationType(pub String);

impl FromStr for OperationType {
    type Err = UnknownOperationType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "replace" => Ok(Self::Replace),
            "delete" => Ok(Self::Delete),
            "drop" => Ok(Self::Drop),
            "rename" => Ok(Self::Rename),
            "dropdatabase" | "drop_database" => Ok(Self::DropDatabase),
            "invalidate" => Ok(Self::Invalidate),
            _ => Err(UnknownOperationType(value.to_owned())),
        }
    }
}

/// One committed mutation delivered by the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    /// Mutation kind.
    pub operation_type: OperationType,
    /// Position to resume from once this event is handled.
    pub position: FeedPosition,
    /// Collection the mutation applies to.
    pub collection: String,
    /// Key of the affected document, when the store reports one.
    pub document_key: Option<Value>,
    /// Full document payload, when requested and available.
    pub document: Option<Value>,
    /// Raw store metadata (cluster time, transaction info, ...).
    #[serde(default)]
    pub metadata: Value,
}

impl ChangeEvent {
    pub fn new(
        operation_type: OperationType,
        position: FeedPosition,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            operation_type,
            position,
            collection: collection.into(),
            document_key: None,
            document: None,
            metadata: Value::Null,
        }
    }

    pub fn with_document_key(mut self, key: Value) -> Self {
        self.document_key = Some(key);
        self
    }

    pub fn with_document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Which events a subscription matches. Fixed for a consumer's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Watched collection.
    pub collection: String,
    /// Accepted operation types. Empty accepts every type.
    pub operation_types: Vec<OperationType>,
}

impl SubscriptionFilter {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operation_types: Vec::new(),
        }
    }

    pub fn with_operation_types(
        mut self,
        operation_types: impl IntoIterator<Item = OperationType>,
    ) -> Self {
        self.operation_types = operation_types.into_iter().collect();
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.collection == self.collection
            && (self.operation_types.is_empty()
                || self.operation_types.contains(&event.operation_type))
    }

    /// Reject filters no store could serve.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.collection.trim().is_empty() {
            return Err(StoreError::new(
                StoreErrorKind::InvalidFilter,
                "subscription filter must name a collection",
            ));
        }
        Ok(())
    }
}

/// Lifecycle state of one consumer's reconnect loop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsumerState {
    /// Created, not started.
    Idle,
    /// A subscription request is in flight.
    Connecting,
    /// A session is open and delivering events.
    Streaming,
    /// The last session ended; deciding whether and when to resubscribe.
    Recovering,
    /// Terminal. No further subscriptions will be attempted.
    Stopped,
}

/// Why a consumer stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Stop was requested by the owner.
    Shutdown,
    /// A non-recoverable failure ended consumption.
    Fatal(FeedError),
}

/// Final report of a consumer run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumerOutcome {
    pub reason: StopReason,
    /// Last position fully handled by the callback.
    pub checkpoint: Option<FeedPosition>,
    /// Number of subscriptions that were successfully opened.
    pub sessions_opened: u32,
}

impl ConsumerOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self.reason, StopReason::Fatal(_))
    }
}

/// Lifecycle notifications emitted by a running consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// The reconnect loop moved to a new state.
    StateChanged { state: ConsumerState },
    /// A subscription was opened.
    SessionOpened {
        session_id: String,
        resume_from: Option<FeedPosition>,
    },
    /// A subscription ended.
    SessionEnded {
        session_id: String,
        events_processed: u64,
        /// `None` when the session was closed by a stop request.
        disposition: Option<Disposition>,
        error_code: Option<String>,
    },
    /// The resume position was discarded; the next subscription resyncs
    /// from the start of the feed and may skip or repeat events.
    HistoryLost { discarded: Option<FeedPosition> },
    /// The loop is waiting before resubscribing.
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
        resume_from: Option<FeedPosition>,
    },
    /// The consumer reached `Stopped`.
    Stopped(ConsumerOutcome),
}
