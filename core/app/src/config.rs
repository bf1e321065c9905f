//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

use fieldbook_common::{Error, Result};
use fieldbook_records::ENTITY_TYPES;
use fieldbook_sync::{CursorKey, SchedulerConfig, SyncConfig};

/// Config file name inside the data directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Local database file name inside the data directory.
pub const DATABASE_FILENAME: &str = "fieldbook.db";

const DEFAULT_API_URL: &str = "http://localhost:8080/api/";

/// Settings for one Fieldbook installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Base URL of the REST API; collection paths are appended to it.
    pub api_base_url: String,
    /// Directory holding the local database.
    pub data_dir: PathBuf,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Targets refreshed by periodic and bulk pulls.
    pub pull_targets: Vec<CursorKey>,
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        default_data_dir().join(CONFIG_FILENAME)
    }

    /// Load from `path`, falling back to defaults if the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Serialize to pretty JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parsed API base URL.
    pub fn api_url(&self) -> Result<Url> {
        Url::parse(&self.api_base_url).map_err(|e| {
            Error::InvalidInput(format!("Invalid API URL '{}': {}", self.api_base_url, e))
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILENAME)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings for the background worker.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            pull_interval: self.sync.pull_interval_secs.map(Duration::from_secs),
            pull_targets: self.pull_targets.clone(),
            retry: self.sync.retry.clone(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            data_dir: default_data_dir(),
            request_timeout_secs: 30,
            pull_targets: ENTITY_TYPES.iter().map(|t| CursorKey::unscoped(*t)).collect(),
            sync: SyncConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fieldbook")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldbook_common::EntityId;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig::load(temp.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.pull_targets.len(), 5);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILENAME);

        let mut config = AppConfig::default();
        config.api_base_url = "https://fieldbook.example/v1".to_string();
        config.data_dir = temp.path().to_path_buf();
        config.pull_targets = vec![CursorKey::scoped("inspections", EntityId::from("p1"))];
        config.sync.pull_interval_secs = None;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.database_path(), temp.path().join(DATABASE_FILENAME));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config =
            AppConfig::from_bytes(br#"{"apiBaseUrl": "https://api.example", "sync": {}}"#).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.sync, SyncConfig::default());
        assert_eq!(config.api_url().unwrap().as_str(), "https://api.example/");
    }

    #[test]
    fn test_invalid_url() {
        let config = AppConfig {
            api_base_url: "not a url".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(config.api_url(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_scheduler_config() {
        let config = AppConfig::default();
        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.pull_interval, Some(Duration::from_secs(300)));
        assert_eq!(scheduler.pull_targets, config.pull_targets);
    }
}
