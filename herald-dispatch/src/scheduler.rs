//! Top-level scheduling policy.
//!
//! Two ways of driving the pipeline exist. In *self-hosted* mode a
//! dedicated poller triggers us and the daemon should simply always be
//! up. In *host-triggered* mode we piggyback on the surrounding host's
//! periodic hook, so the daemon is kept alive only while there is work it
//! can actually do: something due or in flight, and sending not currently
//! rate limited. Every trigger re-evaluates those facts; the most recent
//! decision wins.

use std::{sync::Arc, time::SystemTime};

use serde::Deserialize;

use crate::{
    error::{DispatchError, SystemError},
    limiter::RateLimitLog,
    selector::QueueSelector,
    supervisor::Supervisor,
};

const fn default_trigger_interval_secs() -> u64 {
    60
}

/// How the scheduler is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerMethod {
    /// A dedicated poller triggers us; keep the daemon up unconditionally.
    SelfHosted,
    /// The host's periodic hook triggers us; keep the daemon up only
    /// while it has work.
    HostTriggered,
}

/// Scheduler configuration.
///
/// The method has no default on purpose: running a daemon nobody asked
/// for is worse than refusing to start.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub method: Option<SchedulerMethod>,

    /// Seconds between host triggers (used by the bundled trigger loop)
    ///
    /// Default: 60
    #[serde(default = "default_trigger_interval_secs")]
    pub trigger_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            method: None,
            trigger_interval_secs: default_trigger_interval_secs(),
        }
    }
}

/// What a trigger decided. Advisory only; the trigger surface never
/// blocks on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The daemon should be (and was asked to be) running.
    EnsureRunning,
    /// No runnable work: the daemon was torn down.
    TearDown,
    /// The facts could not be gathered; nothing was changed.
    NoAction,
}

/// Decides, on every trigger, whether the daemon lives or dies.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    method: SchedulerMethod,
    supervisor: Supervisor,
    selector: QueueSelector,
    limiter: RateLimitLog,
}

impl TaskScheduler {
    /// Build a scheduler from its configuration.
    ///
    /// # Errors
    /// Fails with a configuration error when no scheduling method is
    /// configured, the one failure here that must surface instead of
    /// being swallowed.
    pub fn new(
        config: &SchedulerConfig,
        supervisor: Supervisor,
        selector: QueueSelector,
        limiter: RateLimitLog,
    ) -> Result<Self, DispatchError> {
        let method = config.method.ok_or_else(|| {
            SystemError::Configuration("task scheduler method is not configured".to_string())
        })?;

        Ok(Self {
            method,
            supervisor,
            selector,
            limiter,
        })
    }

    #[must_use]
    pub const fn method(&self) -> SchedulerMethod {
        self.method
    }

    /// Evaluate one trigger. Safe to call unconditionally; never fails
    /// the caller: supervision trouble is logged and swallowed so the
    /// host's request path is not held hostage to ours.
    pub async fn decide(&self) -> Decision {
        match self.method {
            SchedulerMethod::SelfHosted => {
                if let Err(e) = self.supervisor.ensure_running().await {
                    tracing::warn!(error = %e, "Could not ensure daemon is running");
                }
                Decision::EnsureRunning
            }
            SchedulerMethod::HostTriggered => self.decide_host_triggered().await,
        }
    }

    async fn decide_host_triggered(&self) -> Decision {
        let now = SystemTime::now();

        let has_work = match self.selector.has_work(now).await {
            Ok(has_work) => has_work,
            Err(e) => {
                tracing::warn!(error = %e, "Could not inspect queues, leaving daemon as-is");
                return Decision::NoAction;
            }
        };

        let allowed = match self.limiter.enforce().await {
            Ok(check) => check.is_allowed(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not check sending limit, leaving daemon as-is");
                return Decision::NoAction;
            }
        };

        if has_work && allowed {
            if let Err(e) = self.supervisor.ensure_running().await {
                tracing::warn!(error = %e, "Could not ensure daemon is running");
            }
            Decision::EnsureRunning
        } else {
            if let Err(e) = self.supervisor.teardown().await {
                tracing::warn!(error = %e, "Could not tear daemon down");
            }
            Decision::TearDown
        }
    }
}

/// Run the host-trigger loop: call [`TaskScheduler::decide`] every
/// `trigger_interval_secs` until shutdown. This is the bundled stand-in
/// for an external periodic hook.
pub async fn trigger_loop(
    scheduler: Arc<TaskScheduler>,
    interval_secs: u64,
    mut shutdown: tokio::sync::broadcast::Receiver<herald_common::Signal>,
) {
    let mut timer = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));

    loop {
        tokio::select! {
            _ = timer.tick() => {
                let decision = scheduler.decide().await;
                tracing::debug!(?decision, "Trigger evaluated");
            }
            _ = shutdown.recv() => {
                tracing::info!("Trigger loop stopping");
                break;
            }
        }
    }
}
