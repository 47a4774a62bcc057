//! Configuration for upload assembly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upload assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Root of the local assembly area (`<root>/<user>/<submission>/`).
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Sessions without a chunk for this long are discarded by
    /// [`UploadAssembler::expire_idle`](super::UploadAssembler::expire_idle).
    #[serde(default = "default_session_idle_timeout_secs")]
    pub session_idle_timeout_secs: u64,

    /// How often the idle sweeper looks for expired sessions.
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_session_idle_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_session_sweep_interval_secs() -> u64 {
    5 * 60
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            session_idle_timeout_secs: default_session_idle_timeout_secs(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
        }
    }
}

impl UploadConfig {
    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }
}
