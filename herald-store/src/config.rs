use std::sync::Arc;

use serde::Deserialize;

use crate::{
    backends::{FileStore, MemoryStore},
    r#trait::{QueueStore, StateStore},
};

/// Configuration for the store backend
///
/// Allows runtime selection of the backing implementation through
/// configuration files.
///
/// File-backed store in TOML config:
/// ```toml
/// [store]
/// type = "File"
/// path = "/var/lib/herald"
/// ```
///
/// Memory-backed store for testing:
/// ```toml
/// [store]
/// type = "Memory"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// File-based store (production)
    File(FileConfig),
    /// Memory-based store (testing/development)
    Memory,
}

/// Configuration for the file-backed store
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Directory holding queue records and scheduler state
    pub path: std::path::PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::File(FileConfig {
            path: std::path::PathBuf::from("/var/lib/herald"),
        })
    }
}

impl StoreConfig {
    /// Build the queue and state stores this configuration describes.
    ///
    /// Both handles point at the same underlying backend, so the queue
    /// records and the scheduler singletons share one storage root.
    ///
    /// # Errors
    /// Returns an error if a file store fails validation or cannot be
    /// created.
    pub fn into_stores(self) -> crate::Result<(Arc<dyn QueueStore>, Arc<dyn StateStore>)> {
        match self {
            Self::File(config) => {
                let store = Arc::new(FileStore::open(config.path)?);
                Ok((store.clone(), store))
            }
            Self::Memory => {
                let store = Arc::new(MemoryStore::new());
                Ok((store.clone(), store))
            }
        }
    }
}
