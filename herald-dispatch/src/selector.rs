//! Read-only queue selection.

use std::{sync::Arc, time::SystemTime};

use herald_store::{QueueId, QueueStore};

use crate::error::DispatchError;

/// Scans the queue store for work.
///
/// Pure queries, no side effects: the selector decides *which* queues are
/// eligible, the processor decides what happens to them.
#[derive(Clone)]
pub struct QueueSelector {
    store: Arc<dyn QueueStore>,
}

impl std::fmt::Debug for QueueSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSelector").finish_non_exhaustive()
    }
}

impl QueueSelector {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Queues due to run at `now`: scheduled, with a scheduled time that
    /// has arrived. Ordered oldest-first, ties broken by id so two
    /// invocations agree on the order.
    ///
    /// # Errors
    /// Returns an error if the queue store is unreachable.
    pub async fn due_queues(&self, now: SystemTime) -> Result<Vec<QueueId>, DispatchError> {
        let mut due: Vec<_> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|v| v.record.is_due(now))
            .map(|v| (v.record.scheduled_at, v.record.id))
            .collect();

        due.sort();

        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    /// Queues whose processing has already begun: the daemon must keep
    /// running to finish them even when nothing new is due.
    ///
    /// # Errors
    /// Returns an error if the queue store is unreachable.
    pub async fn running_queues(&self) -> Result<Vec<QueueId>, DispatchError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|v| v.record.is_running())
            .map(|v| v.record.id)
            .collect())
    }

    /// Whether any queue is due or running at `now`.
    ///
    /// # Errors
    /// Returns an error if the queue store is unreachable.
    pub async fn has_work(&self, now: SystemTime) -> Result<bool, DispatchError> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .any(|v| v.record.is_due(now) || v.record.is_running()))
    }
}
