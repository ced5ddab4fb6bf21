//! Storage contracts for queue records and scheduler singletons.
//!
//! Both traits are written against optimistic concurrency: every read
//! returns the record's version, every write presents the version it was
//! based on. A stale writer is told so and must re-read; last-write-wins
//! on stale reads is not an option.

use async_trait::async_trait;

use crate::{
    daemon::DaemonHandle,
    queue::SendingQueue,
    rate_limit::RateLimitState,
    types::{QueueId, Version, Versioned},
};

/// Persisted store of sending-queue records.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new queue record. Fails if the id is already taken.
    async fn create(&self, queue: SendingQueue) -> crate::Result<QueueId>;

    /// Read one queue record with its current version.
    async fn get(&self, id: &QueueId) -> crate::Result<Versioned<SendingQueue>>;

    /// Read every queue record. Callers filter and order; the store only
    /// promises completeness.
    async fn list(&self) -> crate::Result<Vec<Versioned<SendingQueue>>>;

    /// Replace a queue record, conditional on `expected` still being the
    /// current version. Returns the new version on success and
    /// [`StoreError::Conflict`](crate::StoreError::Conflict) when a
    /// concurrent writer got there first.
    async fn update(
        &self,
        id: &QueueId,
        expected: Version,
        queue: &SendingQueue,
    ) -> crate::Result<Version>;

    /// Remove a queue record.
    async fn delete(&self, id: &QueueId) -> crate::Result<()>;
}

/// Persisted store of the two scheduler singletons: the rate-limit state
/// and the daemon handle.
///
/// Writes are compare-and-swap: `expected` version 0 creates, a matching
/// version replaces, anything else returns `false` and the caller loops
/// with a fresh read. This is what makes read-modify-write cycles atomic
/// across a daemon racing a host-triggered invocation.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the rate-limit state. A store that has never seen a write
    /// returns the default state at version 0.
    async fn rate_limit(&self) -> crate::Result<Versioned<RateLimitState>>;

    /// Compare-and-swap the rate-limit state. Returns `false` when
    /// `expected` is stale.
    async fn store_rate_limit(
        &self,
        expected: Version,
        state: &RateLimitState,
    ) -> crate::Result<bool>;

    /// Read the daemon handle, if one exists.
    async fn daemon(&self) -> crate::Result<Option<Versioned<DaemonHandle>>>;

    /// Compare-and-swap the daemon handle. `expected` 0 creates the
    /// record; returns `false` when `expected` is stale.
    async fn store_daemon(&self, expected: Version, handle: &DaemonHandle) -> crate::Result<bool>;

    /// Delete the daemon handle. Idempotent: deleting an absent handle is
    /// a no-op.
    async fn clear_daemon(&self) -> crate::Result<()>;
}
