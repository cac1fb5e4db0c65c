/// Core types for history entries and exchanged history states.
use serde::{Deserialize, Serialize};

/// What produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    /// A user edit recorded by `save_state`.
    Edit,
    /// A snapshot created by history initialization or reset.
    Init,
}

/// One snapshot in a device's linear undo/redo log.
///
/// Entries are immutable once created. Field names on the wire follow the
/// normative camelCase schema, with `created_at` exposed as `timestampMs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Full text of the field at this point.
    pub value: String,
    /// Wall-clock creation time in milliseconds since the Unix epoch.
    #[serde(rename = "timestampMs")]
    pub created_at: i64,
    /// Lowercase id of the device that created the entry.
    pub device_id: Option<String>,
    pub op_type: Option<OpType>,
    /// Per-device monotonic counter, never reused.
    pub sequence_number: Option<i64>,
    pub version: i64,
}

impl HistoryEntry {
    /// Creates an entry recorded from a user edit.
    pub fn edit(value: &str, created_at: i64, device_id: Option<String>, seq: i64) -> Self {
        Self {
            value: value.to_string(),
            created_at,
            device_id,
            op_type: Some(OpType::Edit),
            sequence_number: Some(seq),
            version: 1,
        }
    }

    /// Creates an entry produced by initialization or reset.
    pub fn init(value: &str, created_at: i64, device_id: Option<String>, seq: i64) -> Self {
        Self {
            op_type: Some(OpType::Init),
            ..Self::edit(value, created_at, device_id, seq)
        }
    }

    /// Device id used for ordering; entries without one sort as `""`.
    pub fn device_key(&self) -> &str {
        self.device_id.as_deref().unwrap_or("")
    }

    /// Whether both entries describe the same logical snapshot.
    ///
    /// Compares the fields that identify where an entry came from; `version`
    /// and `op_type` are ignored.
    pub fn same_origin(&self, other: &HistoryEntry) -> bool {
        self.value == other.value
            && self.created_at == other.created_at
            && self.device_id == other.device_id
            && self.sequence_number == other.sequence_number
    }
}

/// A versioned, checksummed history as exchanged between devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryState {
    /// Entries ordered oldest first.
    pub entries: Vec<HistoryEntry>,
    /// Index of the active entry, or `-1` when `entries` is empty.
    pub current_index: i64,
    pub version: i64,
    /// Lowercase hex digest over `(entries, current_index, version)`.
    #[serde(default)]
    pub checksum: String,
}

impl HistoryState {
    /// An empty state at version 0 without a checksum.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            current_index: -1,
            version: 0,
            checksum: String::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry the active pointer references, if any.
    pub fn current_entry(&self) -> Option<&HistoryEntry> {
        usize::try_from(self.current_index)
            .ok()
            .and_then(|idx| self.entries.get(idx))
    }

    /// Text of the active entry, if any.
    pub fn current_value(&self) -> Option<&str> {
        self.current_entry().map(|e| e.value.as_str())
    }

    /// Newest timestamp among the entries.
    pub fn newest_timestamp(&self) -> Option<i64> {
        self.entries.iter().map(|e| e.created_at).max()
    }
}
