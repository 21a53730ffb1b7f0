/// Engine configuration.
/// Read from a JSON file (e.g. ~/.config/lexera/conflict.json); every field is optional.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// External changes observed more than this many seconds after our own last
    /// save are treated as deliberate external saves.
    pub legitimate_save_threshold_secs: u64,
    /// Lifetime of an unconsumed self-write mark.
    pub self_write_ttl_ms: u64,
    /// Debounce window for the file watcher.
    pub debounce_ms: u64,
    pub write_retries: u32,
    pub retry_delay_ms: u64,
    /// Back up unsaved content before a silent auto-reload overwrites it.
    pub auto_backup_before_reload: bool,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Sub-directory (relative to each file's directory) that receives backups.
    /// `None` places backups next to the file.
    pub directory: Option<String>,
    /// Backups kept per file and label. 0 keeps everything.
    pub max_per_file: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            legitimate_save_threshold_secs: 30,
            self_write_ttl_ms: 10_000,
            debounce_ms: 500,
            write_retries: 2,
            retry_delay_ms: 50,
            auto_backup_before_reload: true,
            backup: BackupConfig::default(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            max_per_file: 10,
        }
    }
}

impl SyncConfig {
    pub fn legitimate_save_threshold(&self) -> Duration {
        Duration::from_secs(self.legitimate_save_threshold_secs)
    }

    pub fn self_write_ttl(&self) -> Duration {
        Duration::from_millis(self.self_write_ttl_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Load config from path, strictly. A missing file yields defaults.
pub fn try_load_config(path: &Path) -> Result<SyncConfig, SyncError> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SyncConfig::default()),
        Err(e) => Err(SyncError::Io(e)),
    }
}

/// Load config from path. Falls back to defaults on any problem.
pub fn load_config(path: &Path) -> SyncConfig {
    match try_load_config(path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("[lexera.config] {}, using defaults", e);
            SyncConfig::default()
        }
    }
}
