//! Aggregate configuration for the dispatch pipeline.

use serde::Deserialize;

use crate::{
    backoff::BackoffPolicy, daemon::DaemonConfig, limiter::RateLimitConfig,
    processor::ProcessorConfig, scheduler::SchedulerConfig, supervisor::SupervisorConfig,
};

/// Everything tunable about the pipeline, in one deserializable place.
///
/// ```toml
/// [scheduler]
/// method = "host-triggered"
///
/// [limiter]
/// window_cap = 500
/// window_secs = 3600
///
/// [processor]
/// batch_size = 50
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub limiter: RateLimitConfig,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}
