//! Scheduling and dispatch pipeline for bulk newsletter sending
//!
//! This crate provides functionality to:
//! - Decide when the background daemon runs and when it is torn down
//! - Select sending queues that are due and advance them batch by batch
//! - Throttle sending against a persisted, windowed rate limit
//! - Back off when the mail provider pushes back
//!
//! The pipeline talks to the outside world through narrow contracts: a
//! queue/state store (`herald-store`), a [`Transport`], and the
//! newsletter/recipient sources.

pub mod backoff;
pub mod config;
pub mod daemon;
pub mod error;
pub mod limiter;
pub mod mailer;
pub mod processor;
pub mod scheduler;
pub mod selector;
pub mod source;
pub mod supervisor;
pub mod transport;

pub use backoff::{BackoffPolicy, calculate_backoff};
pub use config::DispatchConfig;
pub use daemon::{Daemon, DaemonConfig, PassSummary};
pub use error::{DispatchError, PermanentError, SystemError, TemporaryError};
pub use limiter::{LimitCheck, LimitReason, LimitStats, RateLimitConfig, RateLimitLog};
pub use mailer::{BatchOutcome, BatchReceipt, FailedRecipient, Mailer, prepare_recipient};
pub use processor::{ProcessOutcome, ProcessorConfig, QueueProcessor, SkipReason};
pub use scheduler::{Decision, SchedulerConfig, SchedulerMethod, TaskScheduler, trigger_loop};
pub use selector::QueueSelector;
pub use source::{
    Contact, MemoryNewsletterSource, MemoryRecipientSource, Newsletter, NewsletterPayload,
    NewsletterSource, PreparedRecipient, Recipient, RecipientSource,
};
pub use supervisor::{DaemonSpawner, SupervisionOutcome, Supervisor, SupervisorConfig};
pub use transport::{Capability, LogTransport, Transport, TransportError};
