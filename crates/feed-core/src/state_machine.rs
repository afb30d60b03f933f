use crate::{
    error::FeedError,
    types::{ConsumerEvent, ConsumerState},
};

/// Transition table of the reconnect loop.
///
/// `Idle → Connecting → Streaming → Recovering → (Connecting | Stopped)`,
/// plus `Connecting → Recovering` when a subscribe call fails and
/// `any → Stopped` on stop or fatal error.
#[derive(Debug, Clone)]
pub struct ConsumerStateMachine {
    state: ConsumerState,
}

impl Default for ConsumerStateMachine {
    fn default() -> Self {
        Self {
            state: ConsumerState::Idle,
        }
    }
}

impl ConsumerStateMachine {
    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == ConsumerState::Stopped
    }

    pub fn on_start(&mut self) -> Result<ConsumerEvent, FeedError> {
        self.transition_from_state(ConsumerState::Idle, ConsumerState::Connecting, "start")
    }

    pub fn on_subscribed(&mut self) -> Result<ConsumerEvent, FeedError> {
        self.transition_from_state(
            ConsumerState::Connecting,
            ConsumerState::Streaming,
            "subscribed",
        )
    }

    pub fn on_subscribe_failed(&mut self) -> Result<ConsumerEvent, FeedError> {
        self.transition_from_state(
            ConsumerState::Connecting,
            ConsumerState::Recovering,
            "subscribe_failed",
        )
    }

    pub fn on_session_ended(&mut self) -> Result<ConsumerEvent, FeedError> {
        self.transition_from_state(
            ConsumerState::Streaming,
            ConsumerState::Recovering,
            "session_ended",
        )
    }

    pub fn on_retry(&mut self) -> Result<ConsumerEvent, FeedError> {
        self.transition_from_state(
            ConsumerState::Recovering,
            ConsumerState::Connecting,
            "retry",
        )
    }

    /// Move to `Stopped` from any state. Returns `None` when already stopped.
    pub fn on_stop(&mut self) -> Option<ConsumerEvent> {
        if self.is_stopped() {
            return None;
        }
        self.state = ConsumerState::Stopped;
        Some(ConsumerEvent::StateChanged {
            state: ConsumerState::Stopped,
        })
    }

    fn transition_from_state(
        &mut self,
        expected: ConsumerState,
        next: ConsumerState,
        action: &str,
    ) -> Result<ConsumerEvent, FeedError> {
        if self.state != expected {
            return Err(FeedError::invalid_state(self.state, action));
        }
        self.state = next;
        Ok(ConsumerEvent::StateChanged { state: next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_reconnect_cycle_transitions() {
        let mut sm = ConsumerStateMachine::default();
        assert_eq!(sm.state(), ConsumerState::Idle);

        sm.on_start().expect("start must work");
        assert_eq!(sm.state(), ConsumerState::Connecting);

        sm.on_subscribed().expect("subscribe must work");
        assert_eq!(sm.state(), ConsumerState::Streaming);

        sm.on_session_ended().expect("session end must work");
        assert_eq!(sm.state(), ConsumerState::Recovering);

        sm.on_retry().expect("retry must work");
        assert_eq!(sm.state(), ConsumerState::Connecting);

        sm.on_subscribe_failed().expect("subscribe failure must work");
        assert_eq!(sm.state(), ConsumerState::Recovering);

        let event = sm.on_stop().expect("first stop emits a state change");
        assert_eq!(
            event,
            ConsumerEvent::StateChanged {
                state: ConsumerState::Stopped
            }
        );
    }

    #[test]
    fn stop_is_idempotent() {
        let mut sm = ConsumerStateMachine::default();
        assert!(sm.on_stop().is_some());
        assert!(sm.on_stop().is_none());
        assert!(sm.is_stopped());
    }

    #[test]
    fn rejects_retry_while_streaming() {
        let mut sm = ConsumerStateMachine::default();
        sm.on_start().expect("start must work");
        sm.on_subscribed().expect("subscribe must work");

        let err = sm.on_retry().expect_err("retry needs Recovering");
        assert_eq!(err.code, "invalid_state_transition");
    }

    #[test]
    fn stopped_consumer_cannot_restart() {
        let mut sm = ConsumerStateMachine::default();
        sm.on_stop();
        let err = sm.on_start().expect_err("stopped is terminal");
        assert_eq!(err.code, "invalid_state_transition");
    }
}
