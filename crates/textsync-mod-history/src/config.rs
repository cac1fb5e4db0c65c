/// Configuration for the history system.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::entry::HistoryEntry;

/// Maximum number of entries kept in a history, local or merged.
/// Oldest entries are dropped first when this limit is exceeded.
pub const DEFAULT_MAX_ENTRIES: usize = 200;

/// Two entries whose timestamps differ by at most this many milliseconds
/// are treated as concurrent and ordered by device id instead of time.
pub const DEFAULT_TIMESTAMP_TOLERANCE_MS: i64 = 100;

/// How the active pointer is chosen after two histories are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPolicy {
    /// The pointer always lands on the newest merged entry.
    #[default]
    MostRecent,
    /// Keep the local pointer on the same logical entry unless the remote
    /// side contributed an entry newer than everything the local side had.
    PreserveLocal,
}

impl IndexPolicy {
    /// Resolves the merged `current_index`.
    ///
    /// `local_current` is the entry the local pointer referenced before the
    /// merge, `local_newest_ms` the newest local timestamp.
    pub fn resolve(
        self,
        merged: &[HistoryEntry],
        local_current: Option<&HistoryEntry>,
        local_newest_ms: Option<i64>,
    ) -> i64 {
        if merged.is_empty() {
            return -1;
        }
        let last = merged.len() as i64 - 1;

        match self {
            Self::MostRecent => last,
            Self::PreserveLocal => {
                let (Some(current), Some(newest)) = (local_current, local_newest_ms) else {
                    return last;
                };
                let remote_is_newer = merged.iter().any(|e| e.created_at > newest);
                if remote_is_newer {
                    return last;
                }
                merged
                    .iter()
                    .position(|e| e.same_origin(current))
                    .map_or(last, |idx| idx as i64)
            }
        }
    }
}

/// Configuration for the history system.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Max entries kept per history.
    pub max_entries: usize,
    /// Tie-break window for concurrent timestamps, in milliseconds.
    pub timestamp_tolerance_ms: i64,
    /// Active pointer policy applied after a merge.
    pub index_policy: IndexPolicy,
    /// Root directory for the persistence database.
    pub data_dir: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            timestamp_tolerance_ms: DEFAULT_TIMESTAMP_TOLERANCE_MS,
            index_policy: IndexPolicy::default(),
            data_dir: resolve_data_dir(),
        }
    }
}

/// Resolves the data directory path.
///
/// Resolution order:
/// 1. `TEXTSYNC_DATA_DIR` environment variable
/// 2. `textsync/` under the platform data directory
/// 3. `.data/` in the working directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TEXTSYNC_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|d| d.join("textsync"))
        .unwrap_or_else(|| Path::new(".").join(".data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: &str, created_at: i64, device: &str, seq: i64) -> HistoryEntry {
        HistoryEntry::edit(value, created_at, Some(device.to_string()), seq)
    }

    #[test]
    fn test_default_config() {
        let config = HistoryConfig::default();
        assert_eq!(config.max_entries, 200);
        assert_eq!(config.timestamp_tolerance_ms, 100);
        assert_eq!(config.index_policy, IndexPolicy::MostRecent);
    }

    #[test]
    fn test_most_recent_points_at_last() {
        let merged = vec![entry("a", 1, "x", 0), entry("b", 2, "x", 1)];
        let idx = IndexPolicy::MostRecent.resolve(&merged, Some(&merged[0]), Some(2));
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_empty_merge_resolves_to_minus_one() {
        assert_eq!(IndexPolicy::MostRecent.resolve(&[], None, None), -1);
        assert_eq!(IndexPolicy::PreserveLocal.resolve(&[], None, None), -1);
    }

    #[test]
    fn test_preserve_local_keeps_pointer_without_newer_remote() {
        let merged = vec![
            entry("a", 1_000, "x", 0),
            entry("b", 2_000, "y", 0),
            entry("c", 3_000, "x", 1),
        ];
        let current = merged[0].clone();
        let idx = IndexPolicy::PreserveLocal.resolve(&merged, Some(&current), Some(3_000));
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_preserve_local_moves_when_remote_is_newer() {
        let merged = vec![entry("a", 1_000, "x", 0), entry("b", 5_000, "y", 0)];
        let current = merged[0].clone();
        let idx = IndexPolicy::PreserveLocal.resolve(&merged, Some(&current), Some(1_000));
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_resolve_data_dir_with_env_var() {
        let original = std::env::var("TEXTSYNC_DATA_DIR").ok();
        std::env::set_var("TEXTSYNC_DATA_DIR", "/custom/path");
        let dir = resolve_data_dir();
        assert_eq!(dir, PathBuf::from("/custom/path"));
        match original {
            Some(val) => std::env::set_var("TEXTSYNC_DATA_DIR", val),
            None => std::env::remove_var("TEXTSYNC_DATA_DIR"),
        }
    }
}
