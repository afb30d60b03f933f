//! Checkpoint persistence backends.
//!
//! The reconnect loop keeps its checkpoint in memory and mirrors every change
//! into a [`CheckpointStore`] so a restarted process can resume instead of
//! resyncing.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockWriteGuard},
};

use async_trait::async_trait;
use feed_core::FeedPosition;
use thiserror::Error;

mod file;

pub use file::JsonFileCheckpointStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointStoreError {
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("checkpoint data is corrupt: {0}")]
    Corrupt(String),
    #[error("checkpoint store backend failure: {0}")]
    Backend(String),
}

/// Durable home for consumer checkpoints, keyed by consumer name.
///
/// Implementations serialize their own writes; one store may be shared by
/// several consumers running on different threads. Blocking I/O must not run
/// on the calling task.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_position(
        &self,
        consumer: &str,
    ) -> Result<Option<FeedPosition>, CheckpointStoreError>;

    async fn save_position(
        &self,
        consumer: &str,
        position: &FeedPosition,
    ) -> Result<(), CheckpointStoreError>;

    /// Remove the stored position. Clearing a missing entry succeeds.
    async fn clear_position(&self, consumer: &str) -> Result<(), CheckpointStoreError>;
}

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load_position(
        &self,
        consumer: &str,
    ) -> Result<Option<FeedPosition>, CheckpointStoreError> {
        (**self).load_position(consumer).await
    }

    async fn save_position(
        &self,
        consumer: &str,
        position: &FeedPosition,
    ) -> Result<(), CheckpointStoreError> {
        (**self).save_position(consumer, position).await
    }

    async fn clear_position(&self, consumer: &str) -> Result<(), CheckpointStoreError> {
        (**self).clear_position(consumer).await
    }
}

/// Process-local store. Positions are lost when the process exits.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    data: Arc<RwLock<HashMap<String, FeedPosition>>>,
}

impl InMemoryCheckpointStore {
    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<String, FeedPosition>>, CheckpointStoreError> {
        self.data
            .write()
            .map_err(|_| CheckpointStoreError::Backend("poisoned lock".to_owned()))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load_position(
        &self,
        consumer: &str,
    ) -> Result<Option<FeedPosition>, CheckpointStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| CheckpointStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(consumer).cloned())
    }

    async fn save_position(
        &self,
        consumer: &str,
        position: &FeedPosition,
    ) -> Result<(), CheckpointStoreError> {
        self.write()?.insert(consumer.to_owned(), position.clone());
        Ok(())
    }

    async fn clear_position(&self, consumer: &str) -> Result<(), CheckpointStoreError> {
        self.write()?.remove(consumer);
        Ok(())
    }
}

/// A store bound to a single consumer name.
#[derive(Clone)]
pub struct ScopedCheckpointStore<S: CheckpointStore> {
    inner: S,
    consumer: String,
}

impl<S: CheckpointStore> ScopedCheckpointStore<S> {
    pub fn new(inner: S, consumer: impl Into<String>) -> Self {
        Self {
            inner,
            consumer: consumer.into(),
        }
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub async fn load(&self) -> Result<Option<FeedPosition>, CheckpointStoreError> {
        self.inner.load_position(&self.consumer).await
    }

    pub async fn save(&self, position: &FeedPosition) -> Result<(), CheckpointStoreError> {
        self.inner.save_position(&self.consumer, position).await
    }

    pub async fn clear(&self) -> Result<(), CheckpointStoreError> {
        self.inner.clear_position(&self.consumer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let store = InMemoryCheckpointStore::default();
        assert_eq!(store.load_position("orders-tail").await.expect("load"), None);

        store
            .save_position("orders-tail", &FeedPosition::new("tok-7"))
            .await
            .expect("save should work");
        assert_eq!(
            store.load_position("orders-tail").await.expect("load"),
            Some(FeedPosition::new("tok-7"))
        );

        store
            .clear_position("orders-tail")
            .await
            .expect("clear should work");
        store
            .clear_position("orders-tail")
            .await
            .expect("clearing twice should work");
        assert_eq!(
            store.load_position("orders-tail").await.expect("load"),
            None
        );
    }

    #[tokio::test]
    async fn scoped_store_isolates_consumers() {
        let base = InMemoryCheckpointStore::default();
        let a = ScopedCheckpointStore::new(base.clone(), "consumer-a");
        let b = ScopedCheckpointStore::new(base.clone(), "consumer-b");

        a.save(&FeedPosition::new("one")).await.expect("save a");
        b.save(&FeedPosition::new("two")).await.expect("save b");

        assert_eq!(
            a.load().await.expect("load a"),
            Some(FeedPosition::new("one"))
        );
        assert_eq!(
            b.load().await.expect("load b"),
            Some(FeedPosition::new("two"))
        );
    }

    #[tokio::test]
    async fn shared_store_is_visible_through_arc() {
        let base = Arc::new(InMemoryCheckpointStore::default());
        let dyn_store: Arc<dyn CheckpointStore> = base.clone();
        let scoped = ScopedCheckpointStore::new(dyn_store, "tail");

        scoped.save(&FeedPosition::new("p9")).await.expect("save");
        assert_eq!(
            base.load_position("tail").await.expect("load"),
            Some(FeedPosition::new("p9"))
        );
    }

    #[derive(Default)]
    struct FailingStore;

    #[async_trait]
    impl CheckpointStore for FailingStore {
        async fn load_position(
            &self,
            _consumer: &str,
        ) -> Result<Option<FeedPosition>, CheckpointStoreError> {
            Err(CheckpointStoreError::Unavailable("mock outage".to_owned()))
        }

        async fn save_position(
            &self,
            _consumer: &str,
            _position: &FeedPosition,
        ) -> Result<(), CheckpointStoreError> {
            Err(CheckpointStoreError::Unavailable("mock outage".to_owned()))
        }

        async fn clear_position(&self, _consumer: &str) -> Result<(), CheckpointStoreError> {
            Err(CheckpointStoreError::Unavailable("mock outage".to_owned()))
        }
    }

    #[tokio::test]
    async fn mock_failure_propagates_through_scoped_store() {
        let scoped = ScopedCheckpointStore::new(FailingStore, "tail");
        let err = scoped
            .save(&FeedPosition::new("p"))
            .await
            .expect_err("save must fail");
        assert_eq!(
            err,
            CheckpointStoreError::Unavailable("mock outage".to_owned())
        );
    }
}
