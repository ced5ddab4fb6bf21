//! The persisted rate-limit counter.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Process-wide sending counter over a rolling window, with provider
/// backoff bookkeeping.
///
/// This is a plain record; all policy (caps, window length, backoff
/// escalation) lives with the dispatcher. Mutations go through the state
/// store's compare-and-swap so concurrent writers can never both apply an
/// increment from the same base value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Sends recorded in the current window.
    pub sent: u32,
    /// When the current window opened.
    pub window_started_at: SystemTime,
    /// Sending is disallowed until this instant, regardless of the counter.
    pub backoff_until: Option<SystemTime>,
    /// Consecutive provider failures; drives backoff escalation.
    pub retry_attempt: u32,
    /// Last provider-reported error, kept for operator visibility.
    pub last_error: Option<String>,
}

impl RateLimitState {
    #[must_use]
    pub fn new(now: SystemTime) -> Self {
        Self {
            sent: 0,
            window_started_at: now,
            backoff_until: None,
            retry_attempt: 0,
            last_error: None,
        }
    }

    /// Whether the window that opened at `window_started_at` has elapsed.
    #[must_use]
    pub fn window_elapsed(&self, window: Duration, now: SystemTime) -> bool {
        now.duration_since(self.window_started_at)
            .is_ok_and(|age| age >= window)
    }

    /// Whether a provider backoff is currently in force.
    #[must_use]
    pub fn in_backoff(&self, now: SystemTime) -> bool {
        self.backoff_until.is_some_and(|until| now < until)
    }

    /// Open a fresh window at `now`, dropping the counter.
    pub fn reset_window(&mut self, now: SystemTime) {
        self.sent = 0;
        self.window_started_at = now;
    }

    /// Note a successful send cycle: failures are behind us.
    pub fn clear_failure(&mut self) {
        self.retry_attempt = 0;
        self.last_error = None;
        self.backoff_until = None;
    }
}

impl Default for RateLimitState {
    fn default() -> Self {
        Self::new(SystemTime::now())
    }
}
