use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use herald_dispatch::DispatchConfig;
use herald_store::StoreConfig;
use serde::Deserialize;

/// Top-level configuration file.
///
/// ```toml
/// [store]
/// type = "File"
/// path = "/var/lib/herald"
///
/// [scheduler]
/// method = "host-triggered"
///
/// [limiter]
/// window_cap = 500
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(flatten)]
    pub dispatch: DispatchConfig,
}

impl Config {
    ///
    /// # Errors
    ///
    /// If the configuration file doesn't exist, or is not readable,
    /// or if the configuration file is invalid.
    ///
    pub fn from_file(file: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut reader = BufReader::new(File::open(file)?);
        let mut config = String::new();
        reader.read_to_string(&mut config)?;

        toml::from_str(&config).map_err(std::io::Error::other)
    }
}
