/// Error types for history decoding, validation, and navigation.
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    /// A remote `HistoryState` failed schema validation or type coercion.
    #[error("invalid history state payload: {0}")]
    InvalidStatePayload(String),

    /// A recomputed checksum disagrees with the asserted one.
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Undo or redo requested with nothing to navigate to.
    #[error("nothing to navigate to")]
    EmptyHistoryNavigation,
}

pub type Result<T> = std::result::Result<T, HistoryError>;
