//! The daemon supervisor: keeps exactly one live daemon, or none.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use herald_store::{DaemonHandle, StateStore};
use serde::Deserialize;

use crate::error::DispatchError;

const fn default_liveness_threshold_secs() -> u64 {
    35
}

/// Supervisor tunables.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SupervisorConfig {
    /// How old a heartbeat may be before the daemon behind it is
    /// presumed dead. Generous by design: an iteration that is merely
    /// slow, or clocks that disagree by a few seconds, must not trigger
    /// a replacement.
    ///
    /// Default: 35 seconds
    #[serde(default = "default_liveness_threshold_secs")]
    pub liveness_threshold_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            liveness_threshold_secs: default_liveness_threshold_secs(),
        }
    }
}

impl SupervisorConfig {
    #[must_use]
    pub const fn liveness_threshold(&self) -> Duration {
        Duration::from_secs(self.liveness_threshold_secs)
    }
}

/// Starts a background execution for a freshly recorded handle.
///
/// How the daemon actually runs is the runtime's business: a spawned
/// task, a forked process, a remote trigger. The supervisor only decides
/// *when*.
pub trait DaemonSpawner: Send + Sync {
    fn spawn(&self, handle: DaemonHandle);
}

/// What `ensure_running` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// A live daemon already holds the handle; nothing done.
    AlreadyRunning,
    /// No handle existed; a new daemon was started.
    Started,
    /// The recorded daemon's heartbeat had gone stale; a replacement was
    /// started over it.
    Restarted,
}

/// Checks whether the background daemon is alive and (re)starts it when
/// it is not.
#[derive(Clone)]
pub struct Supervisor {
    store: Arc<dyn StateStore>,
    spawner: Arc<dyn DaemonSpawner>,
    config: SupervisorConfig,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        spawner: Arc<dyn DaemonSpawner>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            spawner,
            config,
        }
    }

    /// Make sure a daemon is running: no-op while the recorded heartbeat
    /// is fresh, otherwise record a new handle and spawn against it.
    ///
    /// The handle write is a compare-and-swap, so two supervisors racing
    /// over the same stale daemon start exactly one replacement.
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn ensure_running(&self) -> Result<SupervisionOutcome, DispatchError> {
        let now = SystemTime::now();

        match self.store.daemon().await? {
            Some(existing)
                if existing
                    .record
                    .is_live(self.config.liveness_threshold(), now) =>
            {
                Ok(SupervisionOutcome::AlreadyRunning)
            }
            Some(stale) => {
                let handle = DaemonHandle::new(now);
                if self.store.store_daemon(stale.version, &handle).await? {
                    tracing::warn!(
                        stale_token = %stale.record.token,
                        token = %handle.token,
                        "Daemon heartbeat stale, starting replacement"
                    );
                    self.spawner.spawn(handle);
                    Ok(SupervisionOutcome::Restarted)
                } else {
                    // Another supervisor replaced it first.
                    Ok(SupervisionOutcome::AlreadyRunning)
                }
            }
            None => {
                let handle = DaemonHandle::new(now);
                if self.store.store_daemon(0, &handle).await? {
                    tracing::info!(token = %handle.token, "Starting daemon");
                    self.spawner.spawn(handle);
                    Ok(SupervisionOutcome::Started)
                } else {
                    Ok(SupervisionOutcome::AlreadyRunning)
                }
            }
        }
    }

    /// Delete the daemon handle, asking the daemon to stop after its
    /// current unit of work. Idempotent: no handle, no-op.
    ///
    /// # Errors
    /// Returns an error if the state store is unreachable.
    pub async fn teardown(&self) -> Result<(), DispatchError> {
        self.store.clear_daemon().await?;
        tracing::debug!("Daemon handle cleared");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex;

    use herald_store::{DaemonToken, MemoryStore};

    use super::*;

    #[derive(Default)]
    struct RecordingSpawner {
        spawned: Mutex<Vec<DaemonToken>>,
    }

    impl DaemonSpawner for RecordingSpawner {
        fn spawn(&self, handle: DaemonHandle) {
            self.spawned
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(handle.token);
        }
    }

    fn supervisor(store: &Arc<MemoryStore>) -> (Supervisor, Arc<RecordingSpawner>) {
        let spawner = Arc::new(RecordingSpawner::default());
        (
            Supervisor::new(store.clone(), spawner.clone(), SupervisorConfig::default()),
            spawner,
        )
    }

    #[tokio::test]
    async fn test_starts_daemon_when_none_recorded() {
        let store = Arc::new(MemoryStore::new());
        let (supervisor, spawner) = supervisor(&store);

        let outcome = supervisor.ensure_running().await.unwrap();
        assert_eq!(outcome, SupervisionOutcome::Started);

        let handle = store.daemon().await.unwrap().unwrap();
        assert_eq!(
            spawner.spawned.lock().unwrap().as_slice(),
            &[handle.record.token]
        );
    }

    #[tokio::test]
    async fn test_live_daemon_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let (supervisor, spawner) = supervisor(&store);

        let handle = DaemonHandle::new(SystemTime::now());
        store.store_daemon(0, &handle).await.unwrap();

        let outcome = supervisor.ensure_running().await.unwrap();
        assert_eq!(outcome, SupervisionOutcome::AlreadyRunning);
        assert!(spawner.spawned.lock().unwrap().is_empty());

        let stored = store.daemon().await.unwrap().unwrap();
        assert_eq!(stored.record.token, handle.token);
    }

    #[tokio::test]
    async fn test_stale_daemon_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        let (supervisor, spawner) = supervisor(&store);

        let mut stale = DaemonHandle::new(SystemTime::now());
        stale.last_heartbeat = SystemTime::now() - Duration::from_secs(120);
        store.store_daemon(0, &stale).await.unwrap();

        let outcome = supervisor.ensure_running().await.unwrap();
        assert_eq!(outcome, SupervisionOutcome::Restarted);

        let replacement = store.daemon().await.unwrap().unwrap();
        assert_ne!(replacement.record.token, stale.token);
        assert_eq!(
            spawner.spawned.lock().unwrap().as_slice(),
            &[replacement.record.token]
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let (supervisor, _) = supervisor(&store);

        supervisor.ensure_running().await.unwrap();
        assert!(store.daemon().await.unwrap().is_some());

        supervisor.teardown().await.unwrap();
        assert!(store.daemon().await.unwrap().is_none());

        // A second teardown with no handle is a no-op.
        supervisor.teardown().await.unwrap();
    }
}
