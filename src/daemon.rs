//! Marker for a running `agenda-notify run`.
//!
//! The daemon owns `scheduled.json` while it runs. One-shot commands that
//! would rewrite it check here first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaemonRecord {
    pid: u32,
    started_at: DateTime<Utc>,
}

fn read_record(path: &Path) -> Option<DaemonRecord> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Ignoring malformed daemon record {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn is_alive(_pid: u32) -> bool {
    true
}

/// Pid of a live daemon recorded at `path`, if any.
pub fn running(path: &Path) -> Option<u32> {
    read_record(path)
        .map(|r| r.pid)
        .filter(|pid| *pid != std::process::id() && is_alive(*pid))
}

/// Fail with [`Error::DaemonRunning`] when another daemon holds `path`.
pub fn ensure_not_running(path: &Path) -> Result<()> {
    match running(path) {
        Some(pid) => Err(Error::DaemonRunning(pid)),
        None => Ok(()),
    }
}

/// Held by the daemon for its lifetime. The record is removed on drop.
#[derive(Debug)]
pub struct DaemonGuard {
    path: PathBuf,
}

impl DaemonGuard {
    /// Record this process as the daemon. A stale record is replaced.
    pub fn claim(path: &Path) -> Result<Self> {
        ensure_not_running(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let record = DaemonRecord {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        std::fs::write(path, serde_json::to_vec(&record)?)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
