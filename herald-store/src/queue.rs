//! The persisted sending-queue record and its status machine.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::{NewsletterId, QueueId};

/// Lifecycle status of a sending queue.
///
/// A queue is created `Pending`, becomes `Scheduled` once given a due time,
/// may bounce between `Scheduled` and `Paused`, and ends `Completed` when
/// every recipient has been handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Scheduled,
    Paused,
    Completed,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// One newsletter-send job and its progress.
///
/// Counts only ever move forward: `processed` grows by the size of each
/// dispatched batch, `failed` by the recipients the transport permanently
/// rejected. `failed <= processed <= total` holds after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingQueue {
    pub id: QueueId,
    pub newsletter: NewsletterId,
    pub status: QueueStatus,
    /// When this queue becomes due. `None` until scheduled.
    pub scheduled_at: Option<SystemTime>,
    /// Total recipients this queue will address.
    pub total: u32,
    /// Recipients handed to the transport so far (delivered or rejected).
    pub processed: u32,
    /// Recipients the transport permanently rejected.
    pub failed: u32,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl SendingQueue {
    /// Create a new pending queue for a newsletter with `total` recipients.
    #[must_use]
    pub fn new(newsletter: NewsletterId, total: u32) -> Self {
        let now = SystemTime::now();
        Self {
            id: QueueId::generate(),
            newsletter,
            status: QueueStatus::Pending,
            scheduled_at: None,
            total,
            processed: 0,
            failed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Schedule this queue to become due at `at`.
    pub fn schedule(&mut self, at: SystemTime) {
        self.status = QueueStatus::Scheduled;
        self.scheduled_at = Some(at);
        self.updated_at = SystemTime::now();
    }

    /// Pause a scheduled queue. Advisory: a batch already dispatched is
    /// allowed to complete; only the next iteration honors the pause.
    ///
    /// Returns `false` if the queue was not in a pausable state.
    pub fn pause(&mut self) -> bool {
        if self.status == QueueStatus::Scheduled {
            self.status = QueueStatus::Paused;
            self.updated_at = SystemTime::now();
            true
        } else {
            false
        }
    }

    /// Resume a paused queue. Counts are untouched; sending picks up at the
    /// recorded offset.
    pub fn resume(&mut self) -> bool {
        if self.status == QueueStatus::Paused {
            self.status = QueueStatus::Scheduled;
            self.updated_at = SystemTime::now();
            true
        } else {
            false
        }
    }

    /// Record the outcome of one dispatched batch.
    ///
    /// `delivered` recipients were accepted by the transport, `rejected`
    /// were permanently refused (individual mode only). Both count as
    /// processed. The queue transitions to `Completed` once every
    /// recipient has been processed, including while paused; nothing
    /// remains to resume.
    pub fn record_batch(&mut self, delivered: u32, rejected: u32, now: SystemTime) {
        let advanced = delivered.saturating_add(rejected).min(self.remaining());
        self.processed += advanced;
        self.failed = self.failed.saturating_add(rejected).min(self.processed);
        if self.processed >= self.total {
            self.status = QueueStatus::Completed;
        }
        self.updated_at = now;
    }

    /// Mark this queue completed (recipient source exhausted early).
    pub fn complete(&mut self, now: SystemTime) {
        self.status = QueueStatus::Completed;
        self.updated_at = now;
    }

    /// Recipients still to be processed.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.processed)
    }

    /// Whether this queue is due to run at `now`.
    #[must_use]
    pub fn is_due(&self, now: SystemTime) -> bool {
        self.status == QueueStatus::Scheduled
            && self.scheduled_at.is_some_and(|at| at <= now)
    }

    /// Whether processing of this queue has already begun.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == QueueStatus::Scheduled && self.processed > 0
    }

    /// `failed <= processed <= total`, and completion matches exhaustion.
    #[must_use]
    pub const fn invariants_hold(&self) -> bool {
        self.failed <= self.processed && self.processed <= self.total
    }
}
