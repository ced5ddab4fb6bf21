//! Shared fixtures for integration tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use herald_common::Signal;
use herald_dispatch::{
    BackoffPolicy, Capability, Daemon, DaemonConfig, DaemonSpawner, Mailer,
    MemoryNewsletterSource, MemoryRecipientSource, Newsletter, NewsletterPayload,
    PreparedRecipient, ProcessorConfig, QueueProcessor, QueueSelector, RateLimitConfig,
    RateLimitLog, Recipient, SchedulerConfig, SchedulerMethod, Supervisor, SupervisorConfig,
    TaskScheduler, Transport, TransportError,
};
use herald_store::{DaemonHandle, MemoryStore, NewsletterId, QueueId, QueueStore, SendingQueue};

/// Transport double with a call counter and a scripted failure mode.
#[derive(Debug)]
pub struct MockTransport {
    capability: Capability,
    pub calls: AtomicU32,
    /// Fail every send with a provider rate limit once this many calls
    /// have gone through.
    pub rate_limit_after: Option<u32>,
}

impl MockTransport {
    #[must_use]
    pub fn bulk() -> Self {
        Self {
            capability: Capability::Bulk,
            calls: AtomicU32::new(0),
            rate_limit_after: None,
        }
    }

    #[must_use]
    pub fn individual() -> Self {
        Self {
            capability: Capability::Individual,
            ..Self::bulk()
        }
    }

    fn attempt(&self) -> Result<(), TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.rate_limit_after.is_some_and(|after| call >= after) {
            return Err(TransportError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn send_bulk(
        &self,
        _newsletter: &NewsletterPayload,
        _recipients: &[PreparedRecipient],
    ) -> Result<(), TransportError> {
        self.attempt()
    }

    async fn send_individual(
        &self,
        _newsletter: &NewsletterPayload,
        _recipient: &PreparedRecipient,
    ) -> Result<(), TransportError> {
        self.attempt()
    }
}

/// Spawner that runs the daemon loop as a tokio task, the way the binary
/// wires it.
pub struct TaskSpawner {
    daemon: Daemon,
    shutdown: tokio::sync::broadcast::Sender<Signal>,
}

impl DaemonSpawner for TaskSpawner {
    fn spawn(&self, handle: DaemonHandle) {
        let daemon = self.daemon.clone();
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = daemon.serve(handle.token, shutdown).await {
                eprintln!("daemon exited with error: {e}");
            }
        });
    }
}

/// The whole pipeline over memory backends and a mock transport.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub transport: Arc<MockTransport>,
    pub scheduler: TaskScheduler,
    pub shutdown: tokio::sync::broadcast::Sender<Signal>,
    pub newsletters: Arc<MemoryNewsletterSource>,
    pub recipients: Arc<MemoryRecipientSource>,
}

impl Harness {
    #[must_use]
    pub fn new(transport: MockTransport, method: SchedulerMethod, window_cap: u32) -> Self {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(transport);

        let limiter = RateLimitLog::new(
            store.clone(),
            RateLimitConfig {
                window_cap,
                window_secs: 3600,
            },
            BackoffPolicy {
                base_delay_secs: 60,
                max_delay_secs: 3600,
                jitter_factor: 0.0,
            },
        );

        let newsletters = Arc::new(MemoryNewsletterSource::new());
        let recipients = Arc::new(MemoryRecipientSource::new());

        let processor = QueueProcessor::new(
            store.clone(),
            newsletters.clone(),
            recipients.clone(),
            Mailer::new(transport.clone(), limiter.clone()),
            ProcessorConfig { batch_size: 20 },
        );

        let daemon = Daemon::new(
            store.clone(),
            QueueSelector::new(store.clone()),
            processor,
            limiter.clone(),
            DaemonConfig {
                poll_interval_secs: 1,
            },
        );

        let (shutdown, _) = tokio::sync::broadcast::channel(4);
        let spawner = Arc::new(TaskSpawner {
            daemon: daemon.clone(),
            shutdown: shutdown.clone(),
        });

        let supervisor = Supervisor::new(store.clone(), spawner, SupervisorConfig::default());
        let scheduler = TaskScheduler::new(
            &SchedulerConfig {
                method: Some(method),
                ..SchedulerConfig::default()
            },
            supervisor,
            QueueSelector::new(store.clone()),
            limiter.clone(),
        )
        .expect("method is configured");

        Self {
            store,
            transport,
            scheduler,
            shutdown,
            newsletters,
            recipients,
        }
    }

    /// Seed a queue of `total` recipients, due since a minute ago, with a
    /// resolvable newsletter and recipient list.
    pub async fn seed_queue(&self, total: u32) -> QueueId {
        let newsletter = Newsletter {
            id: NewsletterId::generate(),
            subject: "Integration digest".to_string(),
            sender: Some(herald_dispatch::Contact::new("news@example.com")),
            reply_to: None,
            body: "hello".to_string(),
        };

        let mut queue = SendingQueue::new(newsletter.id, total);
        queue.schedule(SystemTime::now() - Duration::from_secs(60));
        let id = queue.id.clone();

        self.newsletters.insert(newsletter);
        self.recipients.insert(
            id.clone(),
            (0..total)
                .map(|i| Recipient {
                    email: format!("user{i}@example.com"),
                    name: None,
                })
                .collect(),
        );

        QueueStore::create(self.store.as_ref(), queue)
            .await
            .expect("queue seeds cleanly");

        id
    }
}
