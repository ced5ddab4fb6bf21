//! The queue processor: advances one sending queue by one batch.

use std::{sync::Arc, time::SystemTime};

use herald_store::{
    QueueId, QueueStatus, QueueStore, SendingQueue, StoreError, Version,
};
use serde::Deserialize;

use crate::{
    error::DispatchError,
    limiter::LimitReason,
    mailer::{BatchOutcome, BatchReceipt, Mailer},
    source::{NewsletterSource, RecipientSource},
};

const fn default_batch_size() -> u32 {
    50
}

/// Why a queue was skipped without any work being done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No record with that id.
    Missing,
    /// The queue is not in a processable state (pending, paused, or
    /// already completed).
    NotEligible(QueueStatus),
    /// The newsletter behind the queue no longer exists.
    NewsletterMissing,
}

/// Outcome of one `process_one` call.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Every recipient has been processed; the queue is completed.
    Completed { processed: u32, failed: u32 },
    /// One batch was dispatched and persisted; more remain.
    Progressed { processed: u32, failed: u32 },
    /// Sending is globally disallowed. The caller must stop the whole
    /// pass, not just this queue.
    RateLimited(LimitReason),
    /// Nothing to do for this queue.
    Skipped(SkipReason),
    /// A concurrent writer kept winning; the queue is left for the next
    /// iteration.
    Deferred,
}

/// Advances sending queues batch by batch.
///
/// One call handles one queue: resolve the newsletter, pull the next
/// unsent batch at the queue's processed-count cursor, hand it to the
/// mailer, persist the new counts under the version the record was read
/// at. A lost write means someone else advanced the queue meanwhile; the
/// processor re-reads once and reapplies, so each batch is counted
/// exactly once.
#[derive(Clone)]
pub struct QueueProcessor {
    store: Arc<dyn QueueStore>,
    newsletters: Arc<dyn NewsletterSource>,
    recipients: Arc<dyn RecipientSource>,
    mailer: Mailer,
    batch_size: u32,
}

impl std::fmt::Debug for QueueProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

/// Processor tunables.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProcessorConfig {
    /// Recipients per transport batch
    ///
    /// Default: 50
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl QueueProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        newsletters: Arc<dyn NewsletterSource>,
        recipients: Arc<dyn RecipientSource>,
        mailer: Mailer,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            store,
            newsletters,
            recipients,
            mailer,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Process one queue for one batch.
    ///
    /// # Errors
    /// Transport and storage failures propagate; the queue keeps its
    /// last-persisted counts and is retried on the next iteration.
    pub async fn process_one(&self, id: &QueueId) -> Result<ProcessOutcome, DispatchError> {
        let versioned = match self.store.get(id).await {
            Ok(versioned) => versioned,
            Err(StoreError::NotFound(_)) => {
                return Ok(ProcessOutcome::Skipped(SkipReason::Missing));
            }
            Err(e) => return Err(e.into()),
        };

        let queue = versioned.record;
        if queue.status != QueueStatus::Scheduled {
            return Ok(ProcessOutcome::Skipped(SkipReason::NotEligible(queue.status)));
        }

        if queue.remaining() == 0 {
            // A scheduled queue with nothing left shouldn't exist, but a
            // crash between send and persist can leave one. Settle it.
            return self
                .finalize(id, versioned.version, &queue, |q, now| q.complete(now))
                .await;
        }

        let Some(newsletter) = self.newsletters.newsletter(&queue.newsletter).await? else {
            tracing::warn!(
                queue_id = %id,
                newsletter = %queue.newsletter,
                "Newsletter no longer exists, queue cannot proceed"
            );
            return Ok(ProcessOutcome::Skipped(SkipReason::NewsletterMissing));
        };

        let batch = self
            .recipients
            .next_batch(id, queue.processed, self.batch_size.min(queue.remaining()))
            .await?;

        if batch.is_empty() {
            // Recipient list came up short of the recorded total (e.g.
            // unsubscribes since the queue was created). Nothing more
            // will ever arrive at this cursor; the queue is done.
            tracing::info!(
                queue_id = %id,
                processed = queue.processed,
                total = queue.total,
                "Recipient source exhausted, completing queue"
            );
            return self
                .finalize(id, versioned.version, &queue, |q, now| q.complete(now))
                .await;
        }

        match self.mailer.send_batch(&newsletter, &batch).await? {
            BatchOutcome::RateLimited(reason) => Ok(ProcessOutcome::RateLimited(reason)),
            BatchOutcome::Sent(receipt) => {
                self.persist_receipt(id, versioned.version, &queue, &receipt)
                    .await
            }
        }
    }

    /// Persist the receipt against the version the queue was read at,
    /// re-reading and reapplying once if a concurrent writer won.
    async fn persist_receipt(
        &self,
        id: &QueueId,
        version: Version,
        queue: &SendingQueue,
        receipt: &BatchReceipt,
    ) -> Result<ProcessOutcome, DispatchError> {
        let rejected = u32::try_from(receipt.failed.len()).unwrap_or(u32::MAX);
        self.finalize(id, version, queue, move |q, now| {
            q.record_batch(receipt.delivered, rejected, now);
        })
        .await
    }

    /// Apply `mutate` to the queue record and persist it, retrying once
    /// against fresh state on a version conflict. The second conflict
    /// defers the queue to the next iteration; a stale increment must
    /// never be applied.
    async fn finalize<F>(
        &self,
        id: &QueueId,
        version: Version,
        queue: &SendingQueue,
        mutate: F,
    ) -> Result<ProcessOutcome, DispatchError>
    where
        F: Fn(&mut SendingQueue, SystemTime),
    {
        let mut version = version;
        let mut record = queue.clone();

        for attempt in 0..2 {
            let mut updated = record.clone();
            mutate(&mut updated, SystemTime::now());

            match self.store.update(id, version, &updated).await {
                Ok(_) => {
                    debug_assert!(updated.invariants_hold());
                    let outcome = if updated.status == QueueStatus::Completed {
                        tracing::info!(
                            queue_id = %id,
                            processed = updated.processed,
                            failed = updated.failed,
                            "Queue completed"
                        );
                        ProcessOutcome::Completed {
                            processed: updated.processed,
                            failed: updated.failed,
                        }
                    } else {
                        tracing::debug!(
                            queue_id = %id,
                            processed = updated.processed,
                            total = updated.total,
                            "Queue progressed"
                        );
                        ProcessOutcome::Progressed {
                            processed: updated.processed,
                            failed: updated.failed,
                        }
                    };
                    return Ok(outcome);
                }
                Err(StoreError::Conflict { .. }) if attempt == 0 => {
                    tracing::debug!(queue_id = %id, "Lost queue update, re-reading");
                    let fresh = self.store.get(id).await?;
                    version = fresh.version;
                    record = fresh.record;
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::warn!(queue_id = %id, "Repeated queue conflicts, deferring");
                    return Ok(ProcessOutcome::Deferred);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(ProcessOutcome::Deferred)
    }
}
