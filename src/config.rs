use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const APP_NAME: &str = "agenda-notify";

/// Lower bound for the periodic sync interval.
pub const MIN_SYNC_INTERVAL_SECS: u64 = 60;

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join(APP_NAME)
}

fn default_sync_interval() -> u64 {
    15 * 60
}

fn default_true() -> bool {
    true
}

/// Path of the config file when none is given on the command line.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join(APP_NAME)
        .join("config.json")
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_directory: PathBuf,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    pub debug_logging: bool,
    #[serde(default = "default_true")]
    pub sync_on_start: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_dir(),
            sync_interval_secs: default_sync_interval(),
            debug_logging: false,
            sync_on_start: true,
        }
    }
}

impl AppConfig {
    /// Read the config file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn sync_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sync_interval_secs.max(MIN_SYNC_INTERVAL_SECS))
    }

    pub fn servers_path(&self) -> PathBuf {
        self.data_directory.join("servers.json")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.data_directory.join("secrets.json")
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.data_directory.join("sync-state.json")
    }

    pub fn scheduled_path(&self) -> PathBuf {
        self.data_directory.join("scheduled.json")
    }

    pub fn daemon_path(&self) -> PathBuf {
        self.data_directory.join("daemon.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_directory)
    }
}
