/// Disk persistence for canonical history states, backed by redb.
///
/// Uses a single redb database file with one table:
/// - `history_state`: bincode-serialized `HistoryState` keyed by field id
///
/// Writes use optimistic concurrency: a caller states the version it last
/// saw, and the write is refused if the stored version moved on.
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use thiserror::Error;

use crate::checksum::ChecksumAlgorithm;
use crate::config::HistoryConfig;
use crate::entry::HistoryState;
use crate::merge::{merge_history_states, validate_state, verify_checksum};

/// State table: field id → bincode-serialized HistoryState.
const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("history_state");

#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version differs from the one the caller expected.
    #[error("version conflict: expected {expected}, stored {actual}")]
    Conflict { expected: i64, actual: i64 },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Persistent per-field history states.
///
/// Thread-safe: redb supports concurrent readers and serialized writers.
/// Shared across fields via `Arc<HistoryStore>`.
pub struct HistoryStore {
    db: Database,
    config: HistoryConfig,
    algo: Arc<dyn ChecksumAlgorithm>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("data_dir", &self.config.data_dir)
            .finish()
    }
}

fn same_history(a: &HistoryState, b: &HistoryState) -> bool {
    a.current_index == b.current_index
        && a.entries.len() == b.entries.len()
        && a.entries.iter().zip(&b.entries).all(|(x, y)| x.same_origin(y))
}

impl HistoryStore {
    /// Opens or creates the history database in `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened.
    pub fn open(config: HistoryConfig, algo: Arc<dyn ChecksumAlgorithm>) -> anyhow::Result<Arc<Self>> {
        let data_dir: &Path = &config.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("history.redb");
        let db = Database::create(&db_path)
            .with_context(|| format!("Failed to open history database: {}", db_path.display()))?;

        let write_txn = db
            .begin_write()
            .context("Failed to begin initial write transaction")?;
        {
            let _ = write_txn
                .open_table(STATE_TABLE)
                .context("Failed to create history_state table")?;
        }
        write_txn
            .commit()
            .context("Failed to commit initial transaction")?;

        Ok(Arc::new(Self { db, config, algo }))
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Loads the stored state for a field, or `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction or deserialization fails.
    pub fn load(&self, field_id: &str) -> anyhow::Result<Option<HistoryState>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(STATE_TABLE)
            .context("Failed to open history_state table")?;

        match table.get(field_id).context("Failed to read history state")? {
            Some(guard) => {
                let state: HistoryState = bincode::deserialize(guard.value())
                    .context("Failed to deserialize history state")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Persists `state` for a field if the stored version is still
    /// `expected_version` (0 when nothing is stored).
    ///
    /// The incoming state is repaired first. If it matches what is stored,
    /// nothing is written and the stored state is returned. Otherwise it is
    /// written with `version = stored + 1` and a fresh checksum.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` on a version mismatch, or
    /// `StoreError::Storage` if the database fails.
    pub fn sync(
        &self,
        field_id: &str,
        state: &HistoryState,
        expected_version: i64,
    ) -> Result<HistoryState, StoreError> {
        if let Err(e) = verify_checksum(state, self.algo.as_ref()) {
            tracing::warn!(field = field_id, "Checksum mismatch before sync: {e}");
        }

        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        let persisted = {
            let mut table = write_txn
                .open_table(STATE_TABLE)
                .context("Failed to open history_state table")?;

            let stored: Option<HistoryState> = table
                .get(field_id)
                .context("Failed to read history state")?
                .map(|guard| bincode::deserialize(guard.value()))
                .transpose()
                .context("Failed to deserialize history state")?;
            let current_version = stored.as_ref().map_or(0, |s| s.version);

            if current_version != expected_version {
                drop(table);
                write_txn.abort().context("Failed to abort write transaction")?;
                return Err(StoreError::Conflict {
                    expected: expected_version,
                    actual: current_version,
                });
            }

            let validated = validate_state(state.clone(), &self.config, self.algo.as_ref());
            if let Some(stored) = stored.filter(|s| same_history(s, &validated)) {
                tracing::debug!(field = field_id, version = current_version, "History unchanged, skipping write");
                drop(table);
                write_txn.abort().context("Failed to abort write transaction")?;
                return Ok(stored);
            }

            let version = current_version.saturating_add(1);
            let checksum = self
                .algo
                .checksum(&validated.entries, validated.current_index, version);
            let persisted = HistoryState {
                version,
                checksum,
                ..validated
            };
            let bytes = bincode::serialize(&persisted).context("Failed to serialize history state")?;
            table
                .insert(field_id, bytes.as_slice())
                .context("Failed to insert history state")?;
            persisted
        };
        write_txn
            .commit()
            .context("Failed to commit history state")?;

        tracing::debug!(field = field_id, version = persisted.version, "Persisted history state");
        Ok(persisted)
    }

    /// Like [`sync`](Self::sync), but on a version conflict merges the
    /// stored state with `state` and persists the merge.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Storage` if the database fails, or
    /// `StoreError::Conflict` if another writer raced the merge.
    pub fn sync_or_merge(
        &self,
        field_id: &str,
        state: &HistoryState,
        expected_version: i64,
    ) -> Result<HistoryState, StoreError> {
        match self.sync(field_id, state, expected_version) {
            Err(StoreError::Conflict { expected, actual }) => {
                tracing::info!(
                    field = field_id,
                    expected,
                    actual,
                    "Version conflict, merging with stored history"
                );
                let stored = self.load(field_id)?.unwrap_or_else(HistoryState::empty);
                let merged = merge_history_states(&stored, state, &self.config, self.algo.as_ref());
                self.sync(field_id, &merged, stored.version)
            }
            other => other,
        }
    }

    /// Removes the stored state for a field.
    ///
    /// # Errors
    ///
    /// Returns an error if the write transaction fails.
    pub fn delete(&self, field_id: &str) -> anyhow::Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .context("Failed to begin write transaction")?;
        {
            let mut table = write_txn
                .open_table(STATE_TABLE)
                .context("Failed to open history_state table")?;
            table
                .remove(field_id)
                .context("Failed to remove history state")?;
        }
        write_txn.commit().context("Failed to commit deletion")?;
        Ok(())
    }

    /// Lists all field ids that have a stored state.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction fails.
    pub fn list_fields(&self) -> anyhow::Result<Vec<String>> {
        let read_txn = self
            .db
            .begin_read()
            .context("Failed to begin read transaction")?;
        let table = read_txn
            .open_table(STATE_TABLE)
            .context("Failed to open history_state table")?;

        let mut fields = Vec::new();
        for entry in table.iter().context("Failed to iterate history_state table")? {
            let (key_guard, _) = entry.context("Failed to read history_state entry")?;
            fields.push(key_guard.value().to_string());
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Sha256Checksum;
    use crate::entry::HistoryEntry;
    use tempfile::TempDir;

    fn state(values: &[&str], device: &str, start: i64) -> HistoryState {
        let entries: Vec<HistoryEntry> = values
            .iter()
            .enumerate()
            .map(|(i, v)| HistoryEntry::edit(v, start + i as i64 * 1_000, Some(device.into()), i as i64))
            .collect();
        HistoryState {
            current_index: entries.len() as i64 - 1,
            entries,
            version: 0,
            checksum: String::new(),
        }
    }

    fn open_test_store() -> (Arc<HistoryStore>, TempDir) {
        let dir = TempDir::new().expect("create temp dir");
        let config = HistoryConfig {
            data_dir: dir.path().to_path_buf(),
            ..HistoryConfig::default()
        };
        let store = HistoryStore::open(config, Arc::new(Sha256Checksum)).expect("open db");
        (store, dir)
    }

    #[test]
    fn test_open_creates_database() {
        let (store, dir) = open_test_store();
        assert!(dir.path().join("history.redb").exists());
        assert!(store.list_fields().expect("list").is_empty());
    }

    #[test]
    fn test_sync_and_load() {
        let (store, _dir) = open_test_store();
        let saved = store.sync("task", &state(&["a", "b"], "d", 1_000), 0).expect("sync");
        assert_eq!(saved.version, 1);
        assert_eq!(saved.checksum, Sha256Checksum.state_checksum(&saved));

        let loaded = store.load("task").expect("load").expect("exists");
        assert_eq!(loaded, saved);
    }

    #[test]
    fn test_sync_rejects_stale_version() {
        let (store, _dir) = open_test_store();
        store.sync("task", &state(&["a"], "d", 1_000), 0).expect("first");

        match store.sync("task", &state(&["x"], "e", 9_000), 0) {
            Err(StoreError::Conflict { expected, actual }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        let loaded = store.load("task").expect("load").expect("exists");
        assert_eq!(loaded.entries[0].value, "a");
    }

    #[test]
    fn test_sync_unchanged_is_idempotent() {
        let (store, _dir) = open_test_store();
        let first = store.sync("task", &state(&["a", "b"], "d", 1_000), 0).expect("first");
        let again = store.sync("task", &first, 1).expect("again");
        assert_eq!(again.version, 1);
        assert_eq!(again, first);
    }

    #[test]
    fn test_sync_or_merge_resolves_conflict() {
        let (store, _dir) = open_test_store();
        store.sync("task", &state(&["a", "b"], "d", 1_000), 0).expect("first");

        let merged = store
            .sync_or_merge("task", &state(&["x"], "e", 10_000), 0)
            .expect("merge");
        let values: Vec<&str> = merged.entries.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b", "x"]);
        assert_eq!(merged.version, 2);
        assert_eq!(merged.current_index, 2);
    }

    #[test]
    fn test_delete_and_list() {
        let (store, _dir) = open_test_store();
        store.sync("a", &state(&["1"], "d", 0), 0).expect("a");
        store.sync("b", &state(&["2"], "d", 0), 0).expect("b");

        let mut fields = store.list_fields().expect("list");
        fields.sort();
        assert_eq!(fields, vec!["a", "b"]);

        store.delete("a").expect("delete");
        assert!(store.load("a").expect("load").is_none());
        assert!(store.load("b").expect("load").is_some());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = TempDir::new().expect("create temp dir");
        let config = HistoryConfig {
            data_dir: dir.path().to_path_buf(),
            ..HistoryConfig::default()
        };
        {
            let store = HistoryStore::open(config.clone(), Arc::new(Sha256Checksum)).expect("open");
            store.sync("task", &state(&["persistent"], "d", 0), 0).expect("sync");
        }
        {
            let store = HistoryStore::open(config, Arc::new(Sha256Checksum)).expect("reopen");
            let loaded = store.load("task").expect("load").expect("exists");
            assert_eq!(loaded.entries[0].value, "persistent");
            assert_eq!(loaded.version, 1);
        }
    }
}
