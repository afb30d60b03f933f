use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConsumerState;

/// Structured failure kind reported by the change-feed transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The target host could not be reached.
    HostUnreachable,
    /// The target host could not be resolved.
    HostNotFound,
    /// A network operation timed out.
    NetworkTimeout,
    /// The underlying socket failed mid-operation.
    SocketError,
    /// The primary stepped down while the request was in flight.
    PrimarySteppedDown,
    /// The contacted node is no longer primary.
    NotPrimary,
    /// The contacted node is neither primary nor a readable secondary.
    NotPrimaryOrSecondary,
    /// The node is shutting down.
    ShutdownInProgress,
    /// The operation was interrupted by a node shutdown.
    InterruptedAtShutdown,
    /// The operation was interrupted by a replica-set state change.
    InterruptedDueToReplStateChange,
    /// The requested resume position is no longer in retained history.
    HistoryLost,
    /// The caller is not authorized to read the feed.
    Unauthorized,
    /// The subscription filter or options were rejected.
    InvalidFilter,
    /// The client connection was closed locally.
    ClientClosed,
    /// Any failure without a more specific kind.
    Other,
}

impl StoreErrorKind {
    /// Map a replica-set server error code to a failure kind.
    pub fn from_server_code(code: i32) -> Self {
        match code {
            6 => Self::HostUnreachable,
            7 => Self::HostNotFound,
            89 | 262 => Self::NetworkTimeout,
            9001 => Self::SocketError,
            91 => Self::ShutdownInProgress,
            189 => Self::PrimarySteppedDown,
            10107 | 13435 => Self::NotPrimary,
            13436 => Self::NotPrimaryOrSecondary,
            11600 => Self::InterruptedAtShutdown,
            11602 => Self::InterruptedDueToReplStateChange,
            136 | 286 => Self::HistoryLost,
            13 | 18 => Self::Unauthorized,
            2 | 9 => Self::InvalidFilter,
            _ => Self::Other,
        }
    }

    /// Stable machine-readable code for this kind.
    pub fn as_code(self) -> &'static str {
        match self {
            Self::HostUnreachable => "host_unreachable",
            Self::HostNotFound => "host_not_found",
            Self::NetworkTimeout => "network_timeout",
            Self::SocketError => "socket_error",
            Self::PrimarySteppedDown => "primary_stepped_down",
            Self::NotPrimary => "not_primary",
            Self::NotPrimaryOrSecondary => "not_primary_or_secondary",
            Self::ShutdownInProgress => "shutdown_in_progress",
            Self::InterruptedAtShutdown => "interrupted_at_shutdown",
            Self::InterruptedDueToReplStateChange => "interrupted_due_to_repl_state_change",
            Self::HistoryLost => "history_lost",
            Self::Unauthorized => "unauthorized",
            Self::InvalidFilter => "invalid_filter",
            Self::ClientClosed => "client_closed",
            Self::Other => "store_error",
        }
    }
}

/// Failure reported by the store when subscribing or while streaming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{}: {message}", .kind.as_code())]
pub struct StoreError {
    /// Structured failure kind. Classification looks at this field only.
    pub kind: StoreErrorKind,
    /// Raw server error code when the store supplied one.
    pub code: Option<i32>,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Build an error from a raw server code, deriving its kind.
    pub fn from_server_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::from_server_code(code),
            code: Some(code),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }
}

/// What the reconnect loop should do about a terminated session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Keep the checkpoint and resubscribe after a wait.
    Transient,
    /// Discard the checkpoint and resubscribe from the beginning.
    HistoryLost,
    /// Stop consuming and surface the cause.
    Fatal,
}

/// Map a store failure to a [`Disposition`].
///
/// Total and pure: every kind maps to exactly one disposition and message
/// text is never inspected.
pub fn classify(err: &StoreError) -> Disposition {
    use StoreErrorKind::*;

    match err.kind {
        HistoryLost => Disposition::HistoryLost,
        HostUnreachable
        | HostNotFound
        | NetworkTimeout
        | SocketError
        | PrimarySteppedDown
        | NotPrimary
        | NotPrimaryOrSecondary
        | ShutdownInProgress
        | InterruptedAtShutdown
        | InterruptedDueToReplStateChange => Disposition::Transient,
        Unauthorized | InvalidFilter | ClientClosed | Other => Disposition::Fatal,
    }
}

/// Broad error category used for retry decisions and operator reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedErrorCategory {
    /// Network, timeout, or topology disruption.
    TransientConnectivity,
    /// The resume position aged out of the store's history.
    HistoryLost,
    /// The consumer callback rejected an event.
    CallbackFailure,
    /// The store refused the subscription or failed non-recoverably.
    SubscriptionRejected,
    /// Internal bug or invariant break.
    Internal,
}

impl FeedErrorCategory {
    pub fn disposition(self) -> Disposition {
        match self {
            Self::TransientConnectivity => Disposition::Transient,
            Self::HistoryLost => Disposition::HistoryLost,
            Self::CallbackFailure | Self::SubscriptionRejected | Self::Internal => {
                Disposition::Fatal
            }
        }
    }
}

/// Stable consumer error surfaced to the owning process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct FeedError {
    /// High-level error category.
    pub category: FeedErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl FeedError {
    /// Construct a new feed error.
    pub fn new(
        category: FeedErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConsumerState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            FeedErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while consumer is in state {current:?}"),
        )
    }

    /// Wrap a callback rejection.
    pub fn callback(err: &HandlerError) -> Self {
        Self::new(
            FeedErrorCategory::CallbackFailure,
            "callback_failed",
            err.to_string(),
        )
    }

    /// Build the terminal error used when a retry policy runs out of attempts.
    pub fn retry_budget_exhausted(attempts: u32, last: Option<&FeedError>) -> Self {
        let cause = last
            .map(|err| format!(" (last cause: {err})"))
            .unwrap_or_default();
        Self::new(
            FeedErrorCategory::SubscriptionRejected,
            "retry_budget_exhausted",
            format!("gave up after {attempts} consecutive retries{cause}"),
        )
    }

    pub fn disposition(&self) -> Disposition {
        self.category.disposition()
    }
}

impl From<&StoreError> for FeedError {
    fn from(err: &StoreError) -> Self {
        let category = match classify(err) {
            Disposition::Transient => FeedErrorCategory::TransientConnectivity,
            Disposition::HistoryLost => FeedErrorCategory::HistoryLost,
            Disposition::Fatal => FeedErrorCategory::SubscriptionRejected,
        };
        Self {
            category,
            code: err.kind.as_code().to_owned(),
            message: err.message.clone(),
            retry_after_ms: err.retry_after_ms,
        }
    }
}

impl From<StoreError> for FeedError {
    fn from(err: StoreError) -> Self {
        Self::from(&err)
    }
}

/// Failure returned by a consumer callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("payload decode failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_topology_failures_as_transient() {
        for kind in [
            StoreErrorKind::HostUnreachable,
            StoreErrorKind::NetworkTimeout,
            StoreErrorKind::PrimarySteppedDown,
            StoreErrorKind::NotPrimary,
            StoreErrorKind::NotPrimaryOrSecondary,
            StoreErrorKind::ShutdownInProgress,
            StoreErrorKind::InterruptedDueToReplStateChange,
        ] {
            let err = StoreError::new(kind, "boom");
            assert_eq!(classify(&err), Disposition::Transient, "{kind:?}");
        }
    }

    #[test]
    fn classifies_history_loss_separately() {
        let err = StoreError::from_server_code(286, "resume point is gone");
        assert_eq!(err.kind, StoreErrorKind::HistoryLost);
        assert_eq!(classify(&err), Disposition::HistoryLost);
    }

    #[test]
    fn unknown_and_auth_failures_are_fatal() {
        assert_eq!(
            classify(&StoreError::from_server_code(13, "not authorized")),
            Disposition::Fatal
        );
        assert_eq!(
            classify(&StoreError::from_server_code(424_242, "???")),
            Disposition::Fatal
        );
        assert_eq!(
            classify(&StoreError::new(StoreErrorKind::InvalidFilter, "bad")),
            Disposition::Fatal
        );
    }

    #[test]
    fn classification_ignores_message_text() {
        let err = StoreError::new(StoreErrorKind::Other, "network timeout, history lost");
        assert_eq!(classify(&err), Disposition::Fatal);
    }

    #[test]
    fn maps_server_codes_to_kinds() {
        assert_eq!(
            StoreErrorKind::from_server_code(6),
            StoreErrorKind::HostUnreachable
        );
        assert_eq!(
            StoreErrorKind::from_server_code(10107),
            StoreErrorKind::NotPrimary
        );
        assert_eq!(
            StoreErrorKind::from_server_code(11600),
            StoreErrorKind::InterruptedAtShutdown
        );
        assert_eq!(
            StoreErrorKind::from_server_code(136),
            StoreErrorKind::HistoryLost
        );
    }

    #[test]
    fn store_errors_convert_to_feed_categories() {
        let transient = FeedError::from(StoreError::from_server_code(89, "timeout"));
        assert_eq!(transient.category, FeedErrorCategory::TransientConnectivity);
        assert_eq!(transient.code, "network_timeout");

        let fatal = FeedError::from(StoreError::from_server_code(13, "denied"));
        assert_eq!(fatal.category, FeedErrorCategory::SubscriptionRejected);
        assert_eq!(fatal.disposition(), Disposition::Fatal);
    }

    #[test]
    fn callback_failures_are_fatal() {
        let err = FeedError::callback(&HandlerError::new("cannot apply"));
        assert_eq!(err.code, "callback_failed");
        assert_eq!(err.disposition(), Disposition::Fatal);
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = FeedError::invalid_state(ConsumerState::Idle, "retry");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, FeedErrorCategory::Internal);
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = StoreError::new(StoreErrorKind::NotPrimary, "wait")
            .with_retry_after(Duration::from_secs(3));
        assert_eq!(FeedError::from(&err).retry_after_ms, Some(3000));
    }
}
