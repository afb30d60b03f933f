//! Core contract for resumable change-feed consumers.
//!
//! This crate defines the change event model, resume checkpoints, failure
//! classification, retry policies, and the reconnect-loop lifecycle shared by
//! runtimes and their observers.

/// Lifecycle broadcast channel.
pub mod channel;
/// Consumer-owned resume checkpoint.
pub mod checkpoint;
/// Store and consumer error types plus the failure classifier.
pub mod error;
/// Backoff policies used by the reconnect loop.
pub mod retry;
/// Reconnect-loop state machine.
pub mod state_machine;
/// Session termination causes and their normalization.
pub mod termination;
/// Feed protocol types (events, positions, filters, lifecycle events).
pub mod types;

pub use channel::{ConsumerChannels, DEFAULT_EVENT_BUFFER, LifecycleStream};
pub use checkpoint::ConsumerCheckpoint;
pub use error::{
    Disposition, FeedError, FeedErrorCategory, HandlerError, StoreError, StoreErrorKind, classify,
};
pub use retry::{Backoff, DEFAULT_RETRY_INTERVAL_MS, RetryPolicies, RetryPolicy};
pub use state_machine::ConsumerStateMachine;
pub use termination::{SessionEnd, normalize_session_end};
pub use types::{
    ChangeEvent, ConsumerEvent, ConsumerOutcome, ConsumerState, FeedPosition, OperationType,
    StopReason, SubscriptionFilter, UnknownOperationType,
};
