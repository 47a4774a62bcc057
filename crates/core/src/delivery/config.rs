//! Configuration for the drop-box delivery client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for [`FsDeliveryClient`](super::FsDeliveryClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsDeliveryConfig {
    /// Directory watched by the transfer agent.
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,

    /// File written into a delivered folder once every package file is in place.
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}

fn default_ready_marker() -> String {
    "submit.ready".to_string()
}

impl Default for FsDeliveryConfig {
    fn default() -> Self {
        Self {
            outbox_dir: default_outbox_dir(),
            ready_marker: default_ready_marker(),
        }
    }
}

impl FsDeliveryConfig {
    pub fn with_outbox_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.outbox_dir = path.into();
        self
    }
}
