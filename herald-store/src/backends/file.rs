use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;

use crate::{
    StoreError,
    daemon::DaemonHandle,
    error::{SerializationError, ValidationError},
    queue::SendingQueue,
    r#trait::{QueueStore, StateStore},
    rate_limit::RateLimitState,
    types::{QueueId, Version, Versioned},
};

const RATE_LIMIT_RECORD: &str = "rate_limit.bin";
const DAEMON_RECORD: &str = "daemon.bin";

/// File-based store implementation
///
/// Queue records are stored as one bincode file per queue, named by the
/// queue's ULID (`{id}.bin`). The two singletons live next to them as
/// `rate_limit.bin` and `daemon.bin`, which makes the daemon heartbeat a
/// durable, timestamped file record that survives process restarts.
///
/// # Atomicity
/// Every write goes to a temp file first and is renamed into place, so a
/// crash mid-write never leaves a half-written record. Compare-and-swap
/// updates additionally serialize through an async mutex; the store is
/// built for one instance per process, with the version check guarding
/// against stale writers inside that process.
///
/// # Security
/// The store path must be absolute and free of `..` components, and only
/// filenames that parse as valid ULIDs are ever treated as queue records.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FileStore {
    /// Open (and create, if needed) a file store rooted at `path`.
    ///
    /// # Errors
    /// Returns an error if the path fails validation or the directory
    /// cannot be created.
    pub fn open(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        std::fs::create_dir_all(&path)?;
        if !path.is_dir() {
            return Err(ValidationError::NotDirectory(path.display().to_string()).into());
        }

        tracing::debug!(path = %path.display(), "Opened file store");

        Ok(Self {
            path,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    /// The directory this store writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn validate_path(path: &Path) -> crate::Result<()> {
        for component in path.components() {
            if component == std::path::Component::ParentDir {
                return Err(ValidationError::Traversal(path.display().to_string()).into());
            }
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()).into());
        }

        Ok(())
    }

    fn queue_path(&self, id: &QueueId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    async fn read_record<T>(&self, path: &Path) -> crate::Result<Option<Versioned<T>>>
    where
        T: DeserializeOwned,
    {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (record, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(SerializationError::from)?;
        Ok(Some(record))
    }

    async fn write_record<T>(&self, path: &Path, record: &Versioned<T>) -> crate::Result<()>
    where
        T: Serialize,
    {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(SerializationError::from)?;

        // Write to temp, then rename: atomic on the filesystems we care about.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, path).await?;

        Ok(())
    }

    async fn remove_if_present(&self, path: &Path) -> crate::Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl QueueStore for FileStore {
    async fn create(&self, queue: SendingQueue) -> crate::Result<QueueId> {
        let _guard = self.write_lock.lock().await;

        let id = queue.id.clone();
        let path = self.queue_path(&id);
        if self.read_record::<SendingQueue>(&path).await?.is_some() {
            return Err(StoreError::Internal(format!("queue {id} already exists")));
        }

        self.write_record(&path, &Versioned::new(1, queue)).await?;
        Ok(id)
    }

    async fn get(&self, id: &QueueId) -> crate::Result<Versioned<SendingQueue>> {
        self.read_record(&self.queue_path(id))
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list(&self) -> crate::Result<Vec<Versioned<SendingQueue>>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            // Singletons, temp files, and strays all fail ULID validation.
            let Some(id) = name.to_str().and_then(QueueId::from_filename) else {
                continue;
            };

            if let Some(record) = self.read_record(&self.queue_path(&id)).await? {
                records.push(record);
            }
        }

        records.sort_by(|a: &Versioned<SendingQueue>, b| a.record.id.cmp(&b.record.id));
        Ok(records)
    }

    async fn update(
        &self,
        id: &QueueId,
        expected: Version,
        queue: &SendingQueue,
    ) -> crate::Result<Version> {
        let _guard = self.write_lock.lock().await;

        let path = self.queue_path(id);
        let current: Versioned<SendingQueue> = self
            .read_record(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if current.version != expected {
            return Err(StoreError::Conflict {
                record: format!("queue {id}"),
                expected,
                actual: current.version,
            });
        }

        let next = expected + 1;
        self.write_record(&path, &Versioned::new(next, queue.clone()))
            .await?;
        Ok(next)
    }

    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.remove_if_present(&self.queue_path(id)).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.clone()))
        }
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn rate_limit(&self) -> crate::Result<Versioned<RateLimitState>> {
        Ok(self
            .read_record(&self.path.join(RATE_LIMIT_RECORD))
            .await?
            .unwrap_or_else(|| Versioned::new(0, RateLimitState::default())))
    }

    async fn store_rate_limit(
        &self,
        expected: Version,
        state: &RateLimitState,
    ) -> crate::Result<bool> {
        let _guard = self.write_lock.lock().await;

        let path = self.path.join(RATE_LIMIT_RECORD);
        let current = self
            .read_record::<RateLimitState>(&path)
            .await?
            .map_or(0, |v| v.version);
        if current != expected {
            return Ok(false);
        }

        self.write_record(&path, &Versioned::new(current + 1, state.clone()))
            .await?;
        Ok(true)
    }

    async fn daemon(&self) -> crate::Result<Option<Versioned<DaemonHandle>>> {
        self.read_record(&self.path.join(DAEMON_RECORD)).await
    }

    async fn store_daemon(&self, expected: Version, handle: &DaemonHandle) -> crate::Result<bool> {
        let _guard = self.write_lock.lock().await;

        let path = self.path.join(DAEMON_RECORD);
        let current = self
            .read_record::<DaemonHandle>(&path)
            .await?
            .map_or(0, |v| v.version);
        if current != expected {
            return Ok(false);
        }

        self.write_record(&path, &Versioned::new(current + 1, handle.clone()))
            .await?;
        Ok(true)
    }

    async fn clear_daemon(&self) -> crate::Result<()> {
        let _guard = self.write_lock.lock().await;

        self.remove_if_present(&self.path.join(DAEMON_RECORD))
            .await?;
        Ok(())
    }
}
