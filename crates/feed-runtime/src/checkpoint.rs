use std::sync::Arc;

use feed_core::{ConsumerCheckpoint, FeedPosition};
use feed_platform::{CheckpointStore, ScopedCheckpointStore};
use tracing::warn;

/// The scheduler-owned checkpoint, mirrored into a [`CheckpointStore`].
///
/// The in-memory value is authoritative. Store failures are logged and never
/// interrupt consumption.
pub struct Checkpointer {
    checkpoint: ConsumerCheckpoint,
    store: ScopedCheckpointStore<Arc<dyn CheckpointStore>>,
}

impl Checkpointer {
    /// Load the last persisted position for `consumer`, if any.
    pub async fn load(store: Arc<dyn CheckpointStore>, consumer: impl Into<String>) -> Self {
        let store = ScopedCheckpointStore::new(store, consumer);
        let position = match store.load().await {
            Ok(position) => position,
            Err(err) => {
                warn!(
                    consumer = store.consumer(),
                    error = %err,
                    "failed loading checkpoint; starting from the beginning of the feed"
                );
                None
            }
        };

        Self {
            checkpoint: ConsumerCheckpoint::resume_from(position),
            store,
        }
    }

    pub fn current(&self) -> Option<&FeedPosition> {
        self.checkpoint.current()
    }

    pub async fn advance(&mut self, position: FeedPosition) {
        if let Err(err) = self.store.save(&position).await {
            warn!(
                consumer = self.store.consumer(),
                %position,
                error = %err,
                "failed persisting checkpoint"
            );
        }
        self.checkpoint.advance(position);
    }

    /// Forget the position in memory and in the store.
    pub async fn reset(&mut self) -> Option<FeedPosition> {
        if let Err(err) = self.store.clear().await {
            warn!(
                consumer = self.store.consumer(),
                error = %err,
                "failed clearing persisted checkpoint"
            );
        }
        self.checkpoint.reset()
    }

    pub fn into_position(self) -> Option<FeedPosition> {
        self.checkpoint.into_position()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use feed_platform::{CheckpointStoreError, InMemoryCheckpointStore};
    use tokio::time::{Instant, sleep};

    use super::*;

    #[tokio::test]
    async fn resumes_from_persisted_position() {
        let store = Arc::new(InMemoryCheckpointStore::default());
        store
            .save_position("tail", &FeedPosition::new("p4"))
            .await
            .expect("seed");

        let checkpointer = Checkpointer::load(store, "tail").await;
        assert_eq!(checkpointer.current(), Some(&FeedPosition::new("p4")));
    }

    #[tokio::test]
    async fn mirrors_advance_and_reset_into_store() {
        let store = Arc::new(InMemoryCheckpointStore::default());
        let mut checkpointer = Checkpointer::load(store.clone(), "tail").await;

        checkpointer.advance(FeedPosition::new("p1")).await;
        assert_eq!(
            store.load_position("tail").await.expect("load"),
            Some(FeedPosition::new("p1"))
        );

        assert_eq!(checkpointer.reset().await, Some(FeedPosition::new("p1")));
        assert_eq!(store.load_position("tail").await.expect("load"), None);
    }

    struct BrokenStore;

    #[async_trait]
    impl CheckpointStore for BrokenStore {
        async fn load_position(
            &self,
            _: &str,
        ) -> Result<Option<FeedPosition>, CheckpointStoreError> {
            Err(CheckpointStoreError::Unavailable("disk gone".to_owned()))
        }

        async fn save_position(
            &self,
            _: &str,
            _: &FeedPosition,
        ) -> Result<(), CheckpointStoreError> {
            Err(CheckpointStoreError::Unavailable("disk gone".to_owned()))
        }

        async fn clear_position(&self, _: &str) -> Result<(), CheckpointStoreError> {
            Err(CheckpointStoreError::Unavailable("disk gone".to_owned()))
        }
    }

    #[tokio::test]
    async fn store_failures_do_not_block_in_memory_checkpoint() {
        let mut checkpointer = Checkpointer::load(Arc::new(BrokenStore), "tail").await;
        assert_eq!(checkpointer.current(), None);

        checkpointer.advance(FeedPosition::new("p2")).await;
        assert_eq!(checkpointer.current(), Some(&FeedPosition::new("p2")));
        assert_eq!(checkpointer.into_position(), Some(FeedPosition::new("p2")));
    }

    /// Takes a while to persist, the way a slow disk would.
    struct SlowStore {
        inner: InMemoryCheckpointStore,
    }

    #[async_trait]
    impl CheckpointStore for SlowStore {
        async fn load_position(
            &self,
            consumer: &str,
        ) -> Result<Option<FeedPosition>, CheckpointStoreError> {
            self.inner.load_position(consumer).await
        }

        async fn save_position(
            &self,
            consumer: &str,
            position: &FeedPosition,
        ) -> Result<(), CheckpointStoreError> {
            sleep(Duration::from_millis(200)).await;
            self.inner.save_position(consumer, position).await
        }

        async fn clear_position(&self, consumer: &str) -> Result<(), CheckpointStoreError> {
            self.inner.clear_position(consumer).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_persistence_yields_to_other_tasks() {
        let mut checkpointer = Checkpointer::load(
            Arc::new(SlowStore {
                inner: InMemoryCheckpointStore::default(),
            }),
            "tail",
        )
        .await;
        let ticker = tokio::spawn(async {
            sleep(Duration::from_millis(50)).await;
            Instant::now()
        });

        let started = Instant::now();
        checkpointer.advance(FeedPosition::new("p3")).await;
        let ticked_at = ticker.await.expect("ticker");

        assert!(ticked_at < started + Duration::from_millis(200));
        assert_eq!(checkpointer.current(), Some(&FeedPosition::new("p3")));
    }
}
