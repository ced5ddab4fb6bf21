//! The daemon loop: poll, select due queues, process each in turn, sleep.
//!
//! One logical worker, one queue at a time. Teardown is cooperative,
//! never a kill: the loop checks for its own handle between iterations,
//! and writes a heartbeat every iteration so the supervisor can tell a
//! slow daemon from a dead one.

use std::{sync::Arc, time::SystemTime};

use herald_common::{Signal, internal};
use herald_store::{DaemonToken, StateStore};
use serde::Deserialize;

use crate::{
    error::DispatchError,
    limiter::{LimitCheck, RateLimitLog},
    processor::{ProcessOutcome, QueueProcessor},
    selector::QueueSelector,
};

const fn default_poll_interval_secs() -> u64 {
    10
}

/// Daemon loop tunables.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between scheduling iterations
    ///
    /// Default: 10
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl DaemonConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(if self.poll_interval_secs == 0 {
            1
        } else {
            self.poll_interval_secs
        })
    }
}

/// What one scheduling iteration did.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
    /// Queues that moved forward this pass.
    pub progressed: u32,
    /// Queues that reached completion this pass.
    pub completed: u32,
    /// Queues deferred after repeated write conflicts.
    pub deferred: u32,
    /// The pass stopped early because sending is disallowed.
    pub rate_limited: bool,
}

/// The background daemon.
#[derive(Clone)]
pub struct Daemon {
    state: Arc<dyn StateStore>,
    selector: QueueSelector,
    processor: QueueProcessor,
    limiter: RateLimitLog,
    config: DaemonConfig,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    #[must_use]
    pub fn new(
        state: Arc<dyn StateStore>,
        selector: QueueSelector,
        processor: QueueProcessor,
        limiter: RateLimitLog,
        config: DaemonConfig,
    ) -> Self {
        Self {
            state,
            selector,
            processor,
            limiter,
            config,
        }
    }

    /// Run one scheduling iteration: bail out if sending is disallowed,
    /// otherwise process every due queue in order. A rate limit hit
    /// mid-pass stops the whole pass; it is a global throttle, not a
    /// per-queue condition.
    ///
    /// # Errors
    /// Storage failures while selecting queues propagate. Per-queue
    /// failures are logged and do not stop the pass; the queue keeps its
    /// persisted counts and is retried next iteration.
    pub async fn run_pass(&self, now: SystemTime) -> Result<PassSummary, DispatchError> {
        let mut summary = PassSummary::default();

        if let LimitCheck::Limited(reason) = self.limiter.enforce().await? {
            tracing::debug!(?reason, "Sending disallowed, skipping pass");
            summary.rate_limited = true;
            return Ok(summary);
        }

        for id in self.selector.due_queues(now).await? {
            match self.processor.process_one(&id).await {
                Ok(ProcessOutcome::Completed { .. }) => {
                    summary.progressed += 1;
                    summary.completed += 1;
                }
                Ok(ProcessOutcome::Progressed { .. }) => summary.progressed += 1,
                Ok(ProcessOutcome::Deferred) => summary.deferred += 1,
                Ok(ProcessOutcome::Skipped(reason)) => {
                    tracing::debug!(queue_id = %id, ?reason, "Queue skipped");
                }
                Ok(ProcessOutcome::RateLimited(reason)) => {
                    tracing::info!(queue_id = %id, ?reason, "Sending limit hit, stopping pass");
                    summary.rate_limited = true;
                    break;
                }
                Err(e) if e.is_temporary() => {
                    tracing::warn!(queue_id = %id, error = %e, "Batch failed, will retry");
                }
                Err(e) => {
                    tracing::error!(queue_id = %id, error = %e, "Queue processing failed");
                }
            }
        }

        Ok(summary)
    }

    /// Run the daemon loop until told to stop.
    ///
    /// Exits when the stored handle disappears (teardown), when the
    /// stored token is not ours (a replacement daemon was started over
    /// us), or on a shutdown signal. The check happens between
    /// iterations, never mid-batch, so an in-flight pass always drains
    /// before the loop ends.
    ///
    /// # Errors
    /// Never returns an error from transient trouble; iterations log and
    /// carry on. Only the caller dropping the shutdown channel ends the
    /// loop with an error logged.
    pub async fn serve(
        &self,
        token: DaemonToken,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        internal!(level = INFO, "Daemon {token} starting");

        let mut timer = tokio::time::interval(self.config.poll_interval());
        // Skip the first tick to avoid immediate execution
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.state.daemon().await {
                        Ok(None) => {
                            tracing::info!(%token, "Daemon handle deleted, exiting");
                            break;
                        }
                        Ok(Some(current)) if current.record.token != token => {
                            tracing::info!(
                                %token,
                                replacement = %current.record.token,
                                "Replaced by a newer daemon, exiting"
                            );
                            break;
                        }
                        Ok(Some(current)) => {
                            let mut fresh = current.record.clone();
                            fresh.beat(SystemTime::now());
                            match self.state.store_daemon(current.version, &fresh).await {
                                Ok(true) => {}
                                Ok(false) => {
                                    // Handle changed under us; re-check next tick.
                                    continue;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Heartbeat write failed");
                                    continue;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Could not read daemon handle");
                            continue;
                        }
                    }

                    match self.run_pass(SystemTime::now()).await {
                        Ok(summary) if summary.progressed > 0 || summary.rate_limited => {
                            tracing::info!(
                                progressed = summary.progressed,
                                completed = summary.completed,
                                deferred = summary.deferred,
                                rate_limited = summary.rate_limited,
                                "Scheduling pass done"
                            );
                        }
                        Ok(_) => {
                            tracing::trace!("Scheduling pass done, nothing due");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Scheduling pass failed");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            tracing::info!(%token, "Daemon received shutdown signal");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Daemon shutdown channel error");
                            break;
                        }
                    }
                }
            }
        }

        internal!(level = INFO, "Daemon {token} stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use herald_store::{
        DaemonHandle, MemoryStore, NewsletterId, QueueStore, SendingQueue,
    };

    use super::*;
    use crate::{
        backoff::BackoffPolicy,
        limiter::RateLimitConfig,
        mailer::Mailer,
        processor::ProcessorConfig,
        source::{Contact, MemoryNewsletterSource, MemoryRecipientSource, Newsletter, Recipient},
        transport::{Capability, LogTransport},
    };

    async fn daemon_with(store: &Arc<MemoryStore>, cap: u32) -> Daemon {
        let limiter = RateLimitLog::new(
            store.clone(),
            RateLimitConfig {
                window_cap: cap,
                window_secs: 3600,
            },
            BackoffPolicy::default(),
        );

        let newsletters = MemoryNewsletterSource::new();
        let recipients = MemoryRecipientSource::new();

        for record in store.list().await.unwrap() {
            let queue = record.record;
            newsletters.insert(Newsletter {
                id: queue.newsletter,
                subject: "Weekly digest".to_string(),
                sender: Some(Contact::new("news@example.com")),
                reply_to: None,
                body: String::new(),
            });
            recipients.insert(
                queue.id.clone(),
                (0..queue.total)
                    .map(|i| Recipient {
                        email: format!("user{i}@example.com"),
                        name: None,
                    })
                    .collect(),
            );
        }

        let processor = QueueProcessor::new(
            store.clone(),
            Arc::new(newsletters),
            Arc::new(recipients),
            Mailer::new(Arc::new(LogTransport::new(Capability::Bulk)), limiter.clone()),
            ProcessorConfig { batch_size: 10 },
        );

        Daemon::new(
            store.clone(),
            QueueSelector::new(store.clone()),
            processor,
            limiter,
            DaemonConfig {
                poll_interval_secs: 1,
            },
        )
    }

    async fn seed_due_queue(store: &Arc<MemoryStore>, total: u32) -> herald_store::QueueId {
        let mut queue = SendingQueue::new(NewsletterId::generate(), total);
        queue.schedule(SystemTime::now() - Duration::from_secs(1));
        QueueStore::create(store.as_ref(), queue).await.unwrap()
    }

    #[tokio::test]
    async fn test_pass_processes_due_queues_in_order() {
        let store = Arc::new(MemoryStore::new());
        let first = seed_due_queue(&store, 10).await;
        let second = seed_due_queue(&store, 30).await;

        let daemon = daemon_with(&store, 1000).await;
        let summary = daemon.run_pass(SystemTime::now()).await.unwrap();

        assert_eq!(summary.progressed, 2);
        assert_eq!(summary.completed, 1);
        assert!(!summary.rate_limited);

        assert_eq!(store.get(&first).await.unwrap().record.remaining(), 0);
        assert_eq!(store.get(&second).await.unwrap().record.processed, 10);
    }

    #[tokio::test]
    async fn test_pass_stops_at_the_cap() {
        let store = Arc::new(MemoryStore::new());
        let first = seed_due_queue(&store, 10).await;
        let second = seed_due_queue(&store, 10).await;

        // Budget for one batch only.
        let daemon = daemon_with(&store, 10).await;
        let summary = daemon.run_pass(SystemTime::now()).await.unwrap();

        assert!(summary.rate_limited);
        assert_eq!(summary.progressed, 1);

        let (first, second) = if first < second {
            (first, second)
        } else {
            (second, first)
        };
        assert_eq!(store.get(&first).await.unwrap().record.processed, 10);
        assert_eq!(store.get(&second).await.unwrap().record.processed, 0);
    }

    #[tokio::test]
    async fn test_pass_skips_entirely_when_limit_already_reached() {
        let store = Arc::new(MemoryStore::new());
        seed_due_queue(&store, 10).await;

        let daemon = daemon_with(&store, 10).await;
        daemon.limiter.record(10).await.unwrap();

        let summary = daemon.run_pass(SystemTime::now()).await.unwrap();
        assert!(summary.rate_limited);
        assert_eq!(summary.progressed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_exits_when_handle_deleted() {
        let store = Arc::new(MemoryStore::new());
        let daemon = daemon_with(&store, 1000).await;

        let handle = DaemonHandle::new(SystemTime::now());
        store.store_daemon(0, &handle).await.unwrap();
        store.clear_daemon().await.unwrap();

        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        daemon.serve(handle.token, rx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_exits_when_replaced() {
        let store = Arc::new(MemoryStore::new());
        let daemon = daemon_with(&store, 1000).await;

        let ours = DaemonHandle::new(SystemTime::now());
        let replacement = DaemonHandle::new(SystemTime::now());
        store.store_daemon(0, &replacement).await.unwrap();

        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        daemon.serve(ours.token, rx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_honors_shutdown_signal() {
        let store = Arc::new(MemoryStore::new());
        let daemon = daemon_with(&store, 1000).await;

        let handle = DaemonHandle::new(SystemTime::now());
        store.store_daemon(0, &handle).await.unwrap();

        let (tx, rx) = tokio::sync::broadcast::channel(1);
        tx.send(Signal::Shutdown).unwrap();
        daemon.serve(handle.token, rx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_processes_work_and_heartbeats() {
        let store = Arc::new(MemoryStore::new());
        let id = seed_due_queue(&store, 10).await;
        let daemon = daemon_with(&store, 1000).await;

        let handle = DaemonHandle::new(SystemTime::now());
        store.store_daemon(0, &handle).await.unwrap();

        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        let serving = tokio::spawn({
            let daemon = daemon.clone();
            async move { daemon.serve(handle.token, rx).await }
        });

        // Wait for the queue to complete, then tear the daemon down.
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if store.get(&id).await.unwrap().record.remaining() == 0 {
                break;
            }
        }
        store.clear_daemon().await.unwrap();
        serving.await.unwrap().unwrap();

        assert_eq!(store.get(&id).await.unwrap().record.processed, 10);
    }
}
