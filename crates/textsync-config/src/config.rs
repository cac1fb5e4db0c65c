/// Application configuration: load, save, and sanitize.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use textsync_core::MergeOptions;
use textsync_mod_history::config::{resolve_data_dir, DEFAULT_MAX_ENTRIES, DEFAULT_TIMESTAMP_TOLERANCE_MS};
use textsync_mod_history::{HistoryConfig, IndexPolicy};

use crate::device::DeviceId;

/// Upper bound for `max_history_entries`.
pub const MAX_HISTORY_ENTRIES_LIMIT: usize = 10_000;

/// Upper bound for `timestamp_tolerance_ms` (one minute).
pub const MAX_TIMESTAMP_TOLERANCE_MS: i64 = 60_000;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Lowercase id of this installation. Generated on first run.
    #[serde(default)]
    pub device_id: String,
    /// Max entries kept per field history (1..=10000).
    pub max_history_entries: usize,
    /// Window in which entries from different devices count as concurrent.
    pub timestamp_tolerance_ms: i64,
    /// Where the active pointer lands after a history merge.
    pub index_policy: IndexPolicy,
    /// Placed between both sides of a conflicting text edit.
    pub conflict_separator: String,
    /// Directory for the history database. Empty = platform default.
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: DeviceId::generate().into_string(),
            max_history_entries: DEFAULT_MAX_ENTRIES,
            timestamp_tolerance_ms: DEFAULT_TIMESTAMP_TOLERANCE_MS,
            index_policy: IndexPolicy::default(),
            conflict_separator: MergeOptions::default().conflict_separator,
            data_dir: String::new(),
        }
    }
}

impl AppConfig {
    /// Returns the config file path: exe directory + `textsync.json`.
    pub fn config_path() -> PathBuf {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|d| d.join("textsync.json")))
            .unwrap_or_else(|| PathBuf::from("textsync.json"))
    }

    /// Loads config from `path`, creating a default file if it doesn't exist.
    /// Returns defaults on any error (missing file, parse error, etc.).
    ///
    /// A file without a device id gets one generated and written back, so
    /// the id stays stable across runs.
    pub fn load_or_create(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                    Ok(mut config) => {
                        let had_device_id = !config.device_id.trim().is_empty();
                        config.sanitize();
                        if !had_device_id {
                            if let Err(e) = config.save(path) {
                                tracing::warn!("Failed to persist device id to {}: {e}", path.display());
                            }
                        }
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {}: {e}", path.display());
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {}: {e}", path.display());
                }
            }
            // Return defaults on error (don't overwrite broken file)
            let mut config = Self::default();
            config.sanitize();
            config
        } else {
            let config = Self::default();
            if let Err(e) = config.save(path) {
                tracing::warn!("Failed to create default config at {}: {e}", path.display());
            }
            config
        }
    }

    /// Saves config to `path` as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Clamps values to valid ranges and resets invalid fields.
    pub fn sanitize(&mut self) {
        self.max_history_entries = self.max_history_entries.clamp(1, MAX_HISTORY_ENTRIES_LIMIT);
        self.timestamp_tolerance_ms = self
            .timestamp_tolerance_ms
            .clamp(0, MAX_TIMESTAMP_TOLERANCE_MS);

        self.device_id = match DeviceId::parse(&self.device_id) {
            Ok(id) => id.into_string(),
            Err(_) => {
                let id = DeviceId::generate();
                tracing::info!(device_id = %id, "Generated new device id");
                id.into_string()
            }
        };
    }

    /// The history database directory, falling back to the platform default.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if self.data_dir.trim().is_empty() {
            resolve_data_dir()
        } else {
            PathBuf::from(&self.data_dir)
        }
    }

    pub fn to_history_config(&self) -> HistoryConfig {
        HistoryConfig {
            max_entries: self.max_history_entries,
            timestamp_tolerance_ms: self.timestamp_tolerance_ms,
            index_policy: self.index_policy,
            data_dir: self.resolve_data_dir(),
        }
    }

    pub fn to_merge_options(&self) -> MergeOptions {
        MergeOptions {
            conflict_separator: self.conflict_separator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.max_history_entries, 200);
        assert_eq!(config.timestamp_tolerance_ms, 100);
        assert_eq!(config.index_policy, IndexPolicy::MostRecent);
        assert_eq!(config.conflict_separator, "\n");
        assert!(config.data_dir.is_empty());
        assert!(!config.device_id.is_empty());
    }

    #[test]
    fn test_sanitize_clamps_max_entries() {
        let mut config = AppConfig::default();
        config.max_history_entries = 0;
        config.sanitize();
        assert_eq!(config.max_history_entries, 1);

        config.max_history_entries = 1_000_000;
        config.sanitize();
        assert_eq!(config.max_history_entries, 10_000);
    }

    #[test]
    fn test_sanitize_clamps_tolerance() {
        let mut config = AppConfig::default();
        config.timestamp_tolerance_ms = -5;
        config.sanitize();
        assert_eq!(config.timestamp_tolerance_ms, 0);

        config.timestamp_tolerance_ms = 3_600_000;
        config.sanitize();
        assert_eq!(config.timestamp_tolerance_ms, 60_000);
    }

    #[test]
    fn test_sanitize_normalizes_device_id() {
        let mut config = AppConfig::default();
        config.device_id = " Phone-B ".to_string();
        config.sanitize();
        assert_eq!(config.device_id, "phone-b");
    }

    #[test]
    fn test_sanitize_regenerates_empty_device_id() {
        let mut config = AppConfig::default();
        config.device_id = String::new();
        config.sanitize();
        assert_eq!(config.device_id.len(), 36);
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let json = r#"{"timestamp_tolerance_ms": 250}"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.timestamp_tolerance_ms, 250);
        assert_eq!(parsed.max_history_entries, 200);
        assert!(parsed.device_id.is_empty());
    }

    #[test]
    fn test_index_policy_serde_names() {
        let json = r#"{"index_policy": "preserve_local"}"#;
        let parsed: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.index_policy, IndexPolicy::PreserveLocal);
    }

    #[test]
    fn test_to_history_config() {
        let mut config = AppConfig::default();
        config.max_history_entries = 50;
        config.data_dir = "/tmp/textsync-test".to_string();
        let history = config.to_history_config();
        assert_eq!(history.max_entries, 50);
        assert_eq!(history.timestamp_tolerance_ms, 100);
        assert_eq!(history.data_dir, PathBuf::from("/tmp/textsync-test"));
    }

    #[test]
    fn test_to_merge_options() {
        let mut config = AppConfig::default();
        config.conflict_separator = " / ".to_string();
        assert_eq!(config.to_merge_options().conflict_separator, " / ");
    }
}
