use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::delivery::FsDeliveryConfig;
use crate::processor::ProcessorConfig;
use crate::upload::UploadConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub delivery: FsDeliveryConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("submitter.db")
}

/// Status notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    /// Capacity of the status event channel. Events are dropped (and logged)
    /// when the channel is full.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_buffer_size() -> usize {
    1000
}
