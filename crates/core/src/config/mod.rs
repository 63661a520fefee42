use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::skeleton::Vec3;
use crate::timeline::DEFAULT_FRAME_RATE;
use crate::Result;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub storage: StorageConfig,
    pub playback: PlaybackConfig,
    pub timeouts: TimeoutConfig,
}

impl AppConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read(path)?;
        let config = serde_json::from_slice(&contents)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }
}

/// Where dances are listed and downloaded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub list_endpoint: String,
    pub uploads_path: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://miislab.pagekite.me".to_string(),
            list_endpoint: "/list_dances".to_string(),
            uploads_path: "/static/uploads".to_string(),
        }
    }
}

/// Local cache location. Each dance gets a directory below `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("dances"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub frame_rate: f32,
    /// Per-axis factor applied to joint positions before posing.
    pub scale: Vec3,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            scale: Vec3::ONE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for each artifact download.
    pub download_secs: f64,
    /// Budget for one dance during a refresh-all batch.
    pub batch_wait_secs: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            download_secs: 30.0,
            batch_wait_secs: 30.0,
        }
    }
}

impl TimeoutConfig {
    pub fn download(&self) -> Duration {
        Duration::from_secs_f64(self.download_secs.max(0.0))
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_secs_f64(self.batch_wait_secs.max(0.0))
    }
}
