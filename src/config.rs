//! Configuration for everdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a database instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the single data file holding every block
    pub path: PathBuf,

    /// Truncate an existing file and start from an empty database
    pub overwrite: bool,

    /// Map the file copy-on-write; every mutation fails with `ReadOnly`
    pub readonly: bool,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// Flush the whole mapping to disk on `commit` and `close`
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./everdb.dat"),
            overwrite: false,
            readonly: false,
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Recreate the file even if it already exists
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.config.overwrite = overwrite;
        self
    }

    /// Open the file read-only
    pub fn readonly(mut self, readonly: bool) -> Self {
        self.config.readonly = readonly;
        self
    }

    /// Flush to disk on commit/close
    pub fn sync_on_commit(mut self, sync: bool) -> Self {
        self.config.sync_on_commit = sync;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
