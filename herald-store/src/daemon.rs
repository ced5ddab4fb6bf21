//! The persisted daemon handle and its heartbeat.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Token identifying one daemon incarnation.
///
/// A daemon loop compares the stored handle's token against its own each
/// iteration; a mismatch means a replacement daemon has been started over
/// it and it must exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonToken(pub ulid::Ulid);

impl DaemonToken {
    #[must_use]
    pub fn generate() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl std::fmt::Display for DaemonToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Record of the supervised background daemon.
///
/// Created when the supervisor (re)starts a daemon, refreshed by the
/// daemon's own heartbeat each iteration, deleted on teardown. Absence of
/// the record is the cooperative stop signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonHandle {
    pub token: DaemonToken,
    pub started_at: SystemTime,
    pub last_heartbeat: SystemTime,
}

impl DaemonHandle {
    #[must_use]
    pub fn new(now: SystemTime) -> Self {
        Self {
            token: DaemonToken::generate(),
            started_at: now,
            last_heartbeat: now,
        }
    }

    /// Refresh the heartbeat. Heartbeats are monotonic; a stale clock
    /// never moves the timestamp backwards.
    pub fn beat(&mut self, now: SystemTime) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }

    /// Whether the daemon behind this handle is considered alive.
    #[must_use]
    pub fn is_live(&self, threshold: Duration, now: SystemTime) -> bool {
        now.duration_since(self.last_heartbeat)
            .map_or(true, |age| age < threshold)
    }
}
