/// Synchronized undo/redo history for short text fields.
///
/// Provides an `UndoRedoManager` that keeps one device's linear history of
/// text snapshots, merges it with histories received from other devices into
/// a single canonical `HistoryState`, and guards that state with a
/// deterministic SHA-256 checksum. States can be persisted per field in an
/// embedded key-value store (redb) with optimistic version checks.
pub mod checksum;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod manager;
pub mod merge;
pub mod persistence;

pub use checksum::{ChecksumAlgorithm, Sha256Checksum};
pub use codec::{decode_state, decode_state_value, encode_state, CoercingSanitizer, TransportSanitizer};
pub use config::{HistoryConfig, IndexPolicy};
pub use entry::{HistoryEntry, HistoryState, OpType};
pub use error::HistoryError;
pub use manager::UndoRedoManager;
pub use merge::{merge_history_states, validate_state, verify_checksum};
pub use persistence::{HistoryStore, StoreError};
