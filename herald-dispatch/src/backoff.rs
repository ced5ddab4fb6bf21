//! Provider backoff with exponential escalation and jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff policy applied when the provider itself reports a rate limit.
///
/// Each consecutive failure doubles the delay (with jitter) up to
/// `max_delay_secs`; the first success resets the escalation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay for exponential backoff (in seconds).
    ///
    /// Default: 300 seconds (5 minutes)
    #[serde(default = "defaults::base_delay_secs")]
    pub base_delay_secs: u64,

    /// Maximum delay between attempts (in seconds).
    ///
    /// Default: 86400 seconds (24 hours)
    #[serde(default = "defaults::max_delay_secs")]
    pub max_delay_secs: u64,

    /// Jitter factor for randomizing delays (0.0 to 1.0).
    ///
    /// Prevents synchronized retries when several deployments back off at
    /// once. Default: 0.1 (±10%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: defaults::base_delay_secs(),
            max_delay_secs: defaults::max_delay_secs(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given how many consecutive failures
    /// have been seen (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_delay_secs,
            self.max_delay_secs,
            self.jitter_factor,
        )
    }
}

mod defaults {
    pub const fn base_delay_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn max_delay_secs() -> u64 {
        86400 // 24 hours
    }

    pub const fn jitter_factor() -> f64 {
        0.1 // ±10%
    }
}

/// Calculate a backoff delay using exponential escalation with jitter
///
/// # Formula
/// `delay = min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`
#[must_use]
pub fn calculate_backoff(
    attempt: u32,
    base_delay_secs: u64,
    max_delay_secs: u64,
    jitter_factor: f64,
) -> Duration {
    // Use saturating operations to prevent overflow
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        // 2^63 would overflow, use max_delay directly
        max_delay_secs
    } else {
        let multiplier = 1u64 << exponent;
        base_delay_secs
            .saturating_mul(multiplier)
            .min(max_delay_secs)
    };

    // Apply jitter: delay * (1 ± jitter_factor)
    // Intentional precision loss and casting for randomization
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered = {
        let jitter_range = (delay as f64) * jitter_factor;
        if jitter_range > 0.0 {
            let mut rng = rand::rng();
            let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
            ((delay as f64) + jitter).max(0.0) as u64
        } else {
            delay
        }
    };

    Duration::from_secs(jittered)
}
