use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{
    StoreError,
    daemon::DaemonHandle,
    queue::SendingQueue,
    r#trait::{QueueStore, StateStore},
    rate_limit::RateLimitState,
    types::{QueueId, Version, Versioned},
};

/// In-memory store implementation
///
/// Queue records and the two singletons live in `RwLock`-protected maps.
/// Primarily intended for testing, but also usable for transient
/// deployments that accept losing queue progress on restart.
///
/// # Concurrency
/// The version checks run under the write lock, so compare-and-swap
/// semantics hold even with concurrent callers. Lock poisoning is
/// recovered by surfacing an `Internal` error rather than panicking.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    queues: Arc<RwLock<HashMap<QueueId, Versioned<SendingQueue>>>>,
    singletons: Arc<RwLock<Singletons>>,
}

#[derive(Debug, Default)]
struct Singletons {
    rate_limit: Option<Versioned<RateLimitState>>,
    daemon: Option<Versioned<DaemonHandle>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queue records currently held
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the
    /// underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Check if the store holds no queues
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn create(&self, queue: SendingQueue) -> crate::Result<QueueId> {
        let id = queue.id.clone();
        let mut queues = self.queues.write()?;
        if queues.contains_key(&id) {
            return Err(StoreError::Internal(format!("queue {id} already exists")));
        }
        queues.insert(id.clone(), Versioned::new(1, queue));
        Ok(id)
    }

    async fn get(&self, id: &QueueId) -> crate::Result<Versioned<SendingQueue>> {
        self.queues
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list(&self) -> crate::Result<Vec<Versioned<SendingQueue>>> {
        let mut records: Vec<_> = self.queues.read()?.values().cloned().collect();

        // ULIDs are lexicographically sortable by creation time
        records.sort_by(|a, b| a.record.id.cmp(&b.record.id));

        Ok(records)
    }

    async fn update(
        &self,
        id: &QueueId,
        expected: Version,
        queue: &SendingQueue,
    ) -> crate::Result<Version> {
        let mut queues = self.queues.write()?;
        let current = queues
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if current.version != expected {
            return Err(StoreError::Conflict {
                record: format!("queue {id}"),
                expected,
                actual: current.version,
            });
        }

        current.version += 1;
        current.record = queue.clone();
        Ok(current.version)
    }

    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        self.queues
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn rate_limit(&self) -> crate::Result<Versioned<RateLimitState>> {
        Ok(self
            .singletons
            .read()?
            .rate_limit
            .clone()
            .unwrap_or_else(|| Versioned::new(0, RateLimitState::default())))
    }

    async fn store_rate_limit(
        &self,
        expected: Version,
        state: &RateLimitState,
    ) -> crate::Result<bool> {
        let mut singletons = self.singletons.write()?;
        let current = singletons.rate_limit.as_ref().map_or(0, |v| v.version);
        if current != expected {
            return Ok(false);
        }
        singletons.rate_limit = Some(Versioned::new(current + 1, state.clone()));
        Ok(true)
    }

    async fn daemon(&self) -> crate::Result<Option<Versioned<DaemonHandle>>> {
        Ok(self.singletons.read()?.daemon.clone())
    }

    async fn store_daemon(&self, expected: Version, handle: &DaemonHandle) -> crate::Result<bool> {
        let mut singletons = self.singletons.write()?;
        let current = singletons.daemon.as_ref().map_or(0, |v| v.version);
        if current != expected {
            return Ok(false);
        }
        singletons.daemon = Some(Versioned::new(current + 1, handle.clone()));
        Ok(true)
    }

    async fn clear_daemon(&self) -> crate::Result<()> {
        self.singletons.write()?.daemon = None;
        Ok(())
    }
}
