//! Persisted state for the herald newsletter dispatcher
//!
//! This crate owns the three records the scheduling pipeline lives on:
//! - `SendingQueue`: one per newsletter-send job, with batch-by-batch progress
//! - `RateLimitState`: the process-wide sending counter and backoff window
//! - `DaemonHandle`: the supervised background daemon's token and heartbeat
//!
//! plus the storage contracts (`QueueStore`, `StateStore`) and the memory
//! and file backends implementing them. All writes are versioned; see the
//! trait docs for the concurrency discipline.

pub mod backends;
pub mod config;
pub mod daemon;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod r#trait;
pub mod types;

pub use backends::{FileStore, MemoryStore};
pub use config::{FileConfig, StoreConfig};
pub use daemon::{DaemonHandle, DaemonToken};
pub use error::{Result, SerializationError, StoreError, ValidationError};
pub use queue::{QueueStatus, SendingQueue};
pub use r#trait::{QueueStore, StateStore};
pub use rate_limit::RateLimitState;
pub use types::{NewsletterId, QueueId, Version, Versioned};
