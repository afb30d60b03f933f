use tokio::sync::broadcast;

use crate::types::ConsumerEvent;

/// Default capacity of the lifecycle broadcast buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Broadcast stream type used by lifecycle subscribers.
pub type LifecycleStream = broadcast::Receiver<ConsumerEvent>;

/// Fan-out channel for consumer lifecycle notifications.
#[derive(Clone, Debug)]
pub struct ConsumerChannels {
    event_tx: broadcast::Sender<ConsumerEvent>,
}

impl ConsumerChannels {
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted lifecycle events.
    pub fn subscribe(&self) -> LifecycleStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: ConsumerEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for ConsumerChannels {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConsumerState;

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let channels = ConsumerChannels::new(16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        channels.emit(ConsumerEvent::StateChanged {
            state: ConsumerState::Connecting,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[test]
    fn emitting_without_subscribers_is_a_no_op() {
        let channels = ConsumerChannels::new(0);
        channels.emit(ConsumerEvent::HistoryLost { discarded: None });
    }
}
