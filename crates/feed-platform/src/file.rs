use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    process,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use feed_core::FeedPosition;
use tracing::debug;

use crate::{CheckpointStore, CheckpointStoreError};

type CheckpointFile = BTreeMap<String, FeedPosition>;

/// Checkpoints kept in one JSON object on disk, consumer name to position.
///
/// Every write replaces the whole file through a temp file and a rename, so
/// readers never observe a partially written document. File I/O runs on the
/// blocking thread pool.
#[derive(Debug, Clone)]
pub struct JsonFileCheckpointStore {
    file: Arc<CheckpointFileHandle>,
}

#[derive(Debug)]
struct CheckpointFileHandle {
    path: PathBuf,
    lock: Mutex<()>,
    temp_seq: AtomicU64,
}

impl JsonFileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Arc::new(CheckpointFileHandle {
                path: path.into(),
                lock: Mutex::new(()),
                temp_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file.path
    }

    async fn with_file<T, F>(&self, op: F) -> Result<T, CheckpointStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&CheckpointFileHandle) -> Result<T, CheckpointStoreError> + Send + 'static,
    {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = file
                .lock
                .lock()
                .map_err(|_| CheckpointStoreError::Backend("poisoned lock".to_owned()))?;
            op(&file)
        })
        .await
        .map_err(|err| CheckpointStoreError::Backend(format!("checkpoint I/O task failed: {err}")))?
    }
}

impl CheckpointFileHandle {
    fn read_all(&self) -> Result<CheckpointFile, CheckpointStoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(CheckpointFile::new()),
            Err(err) => {
                return Err(CheckpointStoreError::Unavailable(format!(
                    "failed reading checkpoints {}: {err}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice::<CheckpointFile>(&raw).map_err(|err| {
            CheckpointStoreError::Corrupt(format!(
                "failed parsing checkpoints {}: {err}",
                self.path.display()
            ))
        })
    }

    fn replace_all(&self, checkpoints: &CheckpointFile) -> Result<(), CheckpointStoreError> {
        let unavailable = |what: &str, path: &Path, err: io::Error| {
            CheckpointStoreError::Unavailable(format!("{what} {}: {err}", path.display()))
        };

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|err| unavailable("failed creating checkpoint directory", dir, err))?;
        }

        let encoded = serde_json::to_vec_pretty(checkpoints)
            .map_err(|err| CheckpointStoreError::Backend(err.to_string()))?;
        let staged = self.staging_path();
        fs::write(&staged, encoded)
            .map_err(|err| unavailable("failed staging checkpoints", &staged, err))?;
        fs::rename(&staged, &self.path).map_err(|err| {
            let _ = fs::remove_file(&staged);
            unavailable("failed replacing checkpoints", &self.path, err)
        })
    }

    /// Sibling of the target so the final rename stays on one filesystem.
    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("checkpoints.json");
        let seq = self.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{name}.{}.{seq}.tmp", process::id()))
    }

    fn update<F>(&self, apply: F) -> Result<(), CheckpointStoreError>
    where
        F: FnOnce(&mut CheckpointFile) -> bool,
    {
        let mut checkpoints = self.read_all()?;
        if apply(&mut checkpoints) {
            self.replace_all(&checkpoints)?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn load_position(
        &self,
        consumer: &str,
    ) -> Result<Option<FeedPosition>, CheckpointStoreError> {
        let consumer = consumer.to_owned();
        self.with_file(move |file| Ok(file.read_all()?.remove(&consumer)))
            .await
    }

    async fn save_position(
        &self,
        consumer: &str,
        position: &FeedPosition,
    ) -> Result<(), CheckpointStoreError> {
        let key = consumer.to_owned();
        let value = position.clone();
        self.with_file(move |file| {
            file.update(|checkpoints| {
                checkpoints.insert(key, value);
                true
            })
        })
        .await?;
        debug!(consumer, %position, path = %self.path().display(), "checkpoint saved");
        Ok(())
    }

    async fn clear_position(&self, consumer: &str) -> Result<(), CheckpointStoreError> {
        let key = consumer.to_owned();
        self.with_file(move |file| file.update(|checkpoints| checkpoints.remove(&key).is_some()))
            .await?;
        debug!(consumer, path = %self.path().display(), "checkpoint cleared");
        Ok(())
    }
}
