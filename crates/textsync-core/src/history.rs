// Re-exports from textsync-mod-history so callers of the core crate get the
// history model without a second dependency.
pub use textsync_mod_history::{
    decode_state, encode_state, ChecksumAlgorithm, CoercingSanitizer, HistoryConfig, HistoryEntry,
    HistoryError, HistoryState, HistoryStore, IndexPolicy, Sha256Checksum, StoreError,
    TransportSanitizer, UndoRedoManager,
};
