use crate::types::FeedPosition;

/// Most recent position whose event the consumer callback fully handled.
///
/// Starts empty (full resync). Advanced only after a successful callback and
/// reset when the store reports that history was lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerCheckpoint {
    position: Option<FeedPosition>,
    advances: u64,
}

impl ConsumerCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously persisted position.
    pub fn resume_from(position: Option<FeedPosition>) -> Self {
        Self {
            position,
            advances: 0,
        }
    }

    pub fn current(&self) -> Option<&FeedPosition> {
        self.position.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_none()
    }

    /// Number of successful advances since creation.
    pub fn advances(&self) -> u64 {
        self.advances
    }

    pub fn advance(&mut self, position: FeedPosition) {
        self.position = Some(position);
        self.advances = self.advances.saturating_add(1);
    }

    /// Forget the position and return what was discarded.
    pub fn reset(&mut self) -> Option<FeedPosition> {
        self.position.take()
    }

    pub fn into_position(self) -> Option<FeedPosition> {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_last_advanced_position() {
        let mut checkpoint = ConsumerCheckpoint::new();
        assert!(checkpoint.is_empty());

        for token in ["p1", "p2", "p3"] {
            checkpoint.advance(FeedPosition::new(token));
        }

        assert_eq!(checkpoint.current(), Some(&FeedPosition::new("p3")));
        assert_eq!(checkpoint.advances(), 3);
    }

    #[test]
    fn reset_returns_discarded_position() {
        let mut checkpoint = ConsumerCheckpoint::resume_from(Some(FeedPosition::new("a")));
        assert_eq!(checkpoint.reset(), Some(FeedPosition::new("a")));
        assert!(checkpoint.is_empty());
        assert_eq!(checkpoint.reset(), None);
    }
}
