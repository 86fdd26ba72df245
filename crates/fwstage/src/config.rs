//! Runtime configuration for the staging subsystem

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::decision::DEFAULT_NAMESPACE;
use crate::flash::{DEFAULT_CHUNK_SIZE, MAX_PROGRESS_INTERVAL};
use crate::image::ImageFormat;

/// Largest accepted write chunk
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Errors from loading or checking a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        /// File that was read
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Staging subsystem configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory on removable storage holding candidate images
    pub firmware_dir: PathBuf,

    /// Maximum candidates returned by a scan
    pub max_scan_results: usize,

    /// Whether dot-prefixed files are listed
    pub include_hidden: bool,

    /// Accepted image format
    pub image: ImageFormat,

    /// Bytes written per flash chunk
    pub chunk_size: usize,

    /// Bytes between progress reports while writing
    pub progress_interval: u64,

    /// Key/value namespace holding the boot decision
    pub namespace: String,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            firmware_dir: PathBuf::from("firmware"),
            max_scan_results: 32,
            include_hidden: false,
            image: ImageFormat::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            progress_interval: MAX_PROGRESS_INTERVAL,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl StagingConfig {
    /// Load a JSON configuration file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Invalid {
                field: "chunk_size",
                reason: format!("must be between 1 and {MAX_CHUNK_SIZE}"),
            });
        }
        if self.progress_interval == 0 || self.progress_interval > MAX_PROGRESS_INTERVAL {
            return Err(ConfigError::Invalid {
                field: "progress_interval",
                reason: format!("must be between 1 and {MAX_PROGRESS_INTERVAL}"),
            });
        }
        if self.max_scan_results == 0 {
            return Err(ConfigError::Invalid {
                field: "max_scan_results",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.image.extension.is_empty() {
            return Err(ConfigError::Invalid {
                field: "image.extension",
                reason: "must not be empty".to_string(),
            });
        }
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid {
                field: "namespace",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
