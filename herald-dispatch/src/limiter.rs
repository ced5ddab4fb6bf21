//! The sending rate-limit log.
//!
//! A process-wide cap on how many sends may go out within a rolling
//! window, plus the backoff the provider asks for when it pushes back.
//! The counter lives in the state store and every mutation is a
//! compare-and-swap loop: a daemon iteration racing a host-triggered
//! invocation can never both observe "allowed" against the same base
//! state and overshoot the cap together.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use herald_store::{RateLimitState, StateStore};
use serde::{Deserialize, Serialize};

use crate::{backoff::BackoffPolicy, error::DispatchError};

/// Configuration for the sending cap
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sends allowed per window
    ///
    /// Default: 100
    #[serde(default = "default_window_cap")]
    pub window_cap: u32,

    /// Window length in seconds
    ///
    /// Default: 3600 (1 hour)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_cap: default_window_cap(),
            window_secs: default_window_secs(),
        }
    }
}

const fn default_window_cap() -> u32 {
    100
}

const fn default_window_secs() -> u64 {
    3600
}

impl RateLimitConfig {
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Why sending is currently disallowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    /// The local cap for this window is spent.
    CapReached { resets_at: SystemTime },
    /// The provider asked us to back off.
    BackingOff { until: SystemTime },
}

/// Outcome of a limit check. Expected control flow, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitCheck {
    Allowed,
    Limited(LimitReason),
}

impl LimitCheck {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Point-in-time snapshot of the limiter, for operational visibility.
#[derive(Debug, Clone)]
pub struct LimitStats {
    pub sent: u32,
    pub cap: u32,
    pub window_resets_at: SystemTime,
    pub backoff_until: Option<SystemTime>,
    pub retry_attempt: u32,
    pub last_error: Option<String>,
}

/// The rate-limit log.
///
/// `enforce` is the read-only gate; `claim` fuses the gate and the counter
/// increment into one conditional update for callers about to consume the
/// budget; `record` / `release` adjust the counter after the fact.
#[derive(Clone)]
pub struct RateLimitLog {
    store: Arc<dyn StateStore>,
    config: RateLimitConfig,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for RateLimitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLog")
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl RateLimitLog {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, config: RateLimitConfig, backoff: BackoffPolicy) -> Self {
        Self {
            store,
            config,
            backoff,
        }
    }

    /// Evaluate a state snapshot against the configured cap.
    ///
    /// Backoff wins over the counter: while the provider is asking us to
    /// wait, sending is disallowed regardless of how empty the window is.
    /// An elapsed window counts as empty; the reset happens lazily on the
    /// next recorded send.
    #[must_use]
    pub fn evaluate(&self, state: &RateLimitState, now: SystemTime) -> LimitCheck {
        if let Some(until) = state.backoff_until
            && now < until
        {
            return LimitCheck::Limited(LimitReason::BackingOff { until });
        }

        if !state.window_elapsed(self.config.window(), now) && state.sent >= self.config.window_cap
        {
            return LimitCheck::Limited(LimitReason::CapReached {
                resets_at: state.window_started_at + self.config.window(),
            });
        }

        LimitCheck::Allowed
    }

    /// Read-only gate: is sending currently allowed?
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn enforce(&self) -> Result<LimitCheck, DispatchError> {
        let state = self.store.rate_limit().await?;
        Ok(self.evaluate(&state.record, SystemTime::now()))
    }

    /// Atomically check the gate and, when allowed, advance the counter by
    /// `want`. One conditional update, retried against fresh state when a
    /// concurrent writer got there first.
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn claim(&self, want: u32) -> Result<LimitCheck, DispatchError> {
        loop {
            let versioned = self.store.rate_limit().await?;
            let now = SystemTime::now();

            let check = self.evaluate(&versioned.record, now);
            if let LimitCheck::Limited(_) = check {
                return Ok(check);
            }

            let mut state = versioned.record.clone();
            if state.window_elapsed(self.config.window(), now) {
                state.reset_window(now);
            }
            state.sent = state.sent.saturating_add(want);

            if self.store.store_rate_limit(versioned.version, &state).await? {
                return Ok(LimitCheck::Allowed);
            }
            // Lost the race; loop with a fresh read.
        }
    }

    /// Advance the counter by `sent` sends that already happened, opening
    /// a fresh window first if the current one has elapsed.
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn record(&self, sent: u32) -> Result<(), DispatchError> {
        self.mutate(|state, now, window| {
            if state.window_elapsed(window, now) {
                state.reset_window(now);
            }
            state.sent = state.sent.saturating_add(sent);
        })
        .await
    }

    /// Hand back `unused` sends that were claimed but never attempted
    /// (the transport failed before reaching them).
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn release(&self, unused: u32) -> Result<(), DispatchError> {
        if unused == 0 {
            return Ok(());
        }
        self.mutate(|state, _, _| {
            state.sent = state.sent.saturating_sub(unused);
        })
        .await
    }

    /// Note that the provider accepted mail again: clears the failure
    /// bookkeeping. Skips the write when there is nothing to clear.
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn note_success(&self) -> Result<(), DispatchError> {
        let versioned = self.store.rate_limit().await?;
        let state = &versioned.record;
        if state.retry_attempt == 0 && state.last_error.is_none() && state.backoff_until.is_none() {
            return Ok(());
        }

        self.mutate(|state, _, _| state.clear_failure()).await
    }

    /// Record a provider-reported rate limit: escalate the attempt
    /// counter and install a backoff window. The provider's own
    /// `retry_after` wins over the computed delay when given.
    ///
    /// Returns the backoff duration that was applied.
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn record_failure(
        &self,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<Duration, DispatchError> {
        loop {
            let versioned = self.store.rate_limit().await?;
            let now = SystemTime::now();

            let mut state = versioned.record.clone();
            state.retry_attempt = state.retry_attempt.saturating_add(1);
            let delay = retry_after.unwrap_or_else(|| self.backoff.delay_for(state.retry_attempt));
            state.backoff_until = Some(now + delay);
            state.last_error = Some(error.to_string());

            if self.store.store_rate_limit(versioned.version, &state).await? {
                tracing::warn!(
                    error,
                    attempt = state.retry_attempt,
                    backoff_secs = delay.as_secs(),
                    "Provider rate limit recorded, backing off"
                );
                return Ok(delay);
            }
        }
    }

    /// Snapshot the limiter for reporting.
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn stats(&self) -> Result<LimitStats, DispatchError> {
        let state = self.store.rate_limit().await?.record;
        Ok(LimitStats {
            sent: state.sent,
            cap: self.config.window_cap,
            window_resets_at: state.window_started_at + self.config.window(),
            backoff_until: state.backoff_until,
            retry_attempt: state.retry_attempt,
            last_error: state.last_error,
        })
    }

    async fn mutate<F>(&self, apply: F) -> Result<(), DispatchError>
    where
        F: Fn(&mut RateLimitState, SystemTime, Duration),
    {
        loop {
            let versioned = self.store.rate_limit().await?;
            let now = SystemTime::now();

            let mut state = versioned.record.clone();
            apply(&mut state, now, self.config.window());

            if self.store.store_rate_limit(versioned.version, &state).await? {
                return Ok(());
            }
        }
    }
}
