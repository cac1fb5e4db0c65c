/// Deterministic checksums over history states.
///
/// The digest covers a fixed-shape canonical form of
/// `(current_index, entries, version)`. Merge and manager code only talk to
/// the `ChecksumAlgorithm` trait, so the hash and encoding can be swapped.
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::entry::{HistoryEntry, HistoryState};

/// Computes the integrity digest of a history.
///
/// Implementations must be pure: equal inputs always produce equal strings,
/// on any thread and any device.
pub trait ChecksumAlgorithm: Send + Sync + std::fmt::Debug {
    fn checksum(&self, entries: &[HistoryEntry], current_index: i64, version: i64) -> String;

    /// Digest of a whole state, ignoring its stored `checksum` field.
    fn state_checksum(&self, state: &HistoryState) -> String {
        self.checksum(&state.entries, state.current_index, state.version)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalEntry<'a> {
    value: &'a str,
    timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_number: Option<i64>,
    version: i64,
}

// Field order here is the canonical order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalState<'a> {
    current_index: i64,
    entries: Vec<CanonicalEntry<'a>>,
    version: i64,
}

/// Serializes the checksum-relevant fields as compact JSON with stable
/// field order.
pub fn canonical_bytes(entries: &[HistoryEntry], current_index: i64, version: i64) -> Vec<u8> {
    let data = CanonicalState {
        current_index,
        entries: entries
            .iter()
            .map(|e| CanonicalEntry {
                value: &e.value,
                timestamp_ms: e.created_at,
                device_id: e.device_id.as_deref(),
                sequence_number: e.sequence_number,
                version: e.version,
            })
            .collect(),
        version,
    };
    // Only strings and integers: serialization cannot fail.
    serde_json::to_vec(&data).unwrap_or_default()
}

/// SHA-256 over the canonical JSON form, rendered as lowercase hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Checksum;

impl ChecksumAlgorithm for Sha256Checksum {
    fn checksum(&self, entries: &[HistoryEntry], current_index: i64, version: i64) -> String {
        let bytes = canonical_bytes(entries, current_index, version);
        hex::encode(Sha256::digest(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::OpType;

    fn sample() -> Vec<HistoryEntry> {
        vec![
            HistoryEntry::init("", 1_000, Some("dev-a".into()), 0),
            HistoryEntry::edit("hello", 2_000, Some("dev-a".into()), 1),
            HistoryEntry::edit("hello world", 3_000, Some("dev-b".into()), 0),
        ]
    }

    #[test]
    fn test_checksum_is_lowercase_hex_sha256() {
        let sum = Sha256Checksum.checksum(&sample(), 2, 5);
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let a = Sha256Checksum.checksum(&sample(), 2, 5);
        let b = Sha256Checksum.checksum(&sample(), 2, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn test_construction_order_does_not_matter() {
        let forward = sample();

        let mut built = Vec::new();
        let mut pending = sample();
        pending.reverse();
        while let Some(e) = pending.pop() {
            let rebuilt = HistoryEntry {
                version: e.version,
                sequence_number: e.sequence_number,
                op_type: e.op_type,
                device_id: e.device_id.clone(),
                created_at: e.created_at,
                value: e.value.clone(),
            };
            built.push(rebuilt);
        }

        assert_eq!(
            Sha256Checksum.checksum(&forward, 1, 3),
            Sha256Checksum.checksum(&built, 1, 3)
        );
    }

    #[test]
    fn test_op_type_is_not_covered() {
        let mut entries = sample();
        let before = Sha256Checksum.checksum(&entries, 0, 1);
        entries[1].op_type = Some(OpType::Init);
        assert_eq!(before, Sha256Checksum.checksum(&entries, 0, 1));
    }

    #[test]
    fn test_each_covered_field_changes_digest() {
        let base = Sha256Checksum.checksum(&sample(), 2, 5);
        assert_ne!(base, Sha256Checksum.checksum(&sample(), 1, 5));
        assert_ne!(base, Sha256Checksum.checksum(&sample(), 2, 6));

        let mut entries = sample();
        entries[2].value.push('!');
        assert_ne!(base, Sha256Checksum.checksum(&entries, 2, 5));

        let mut entries = sample();
        entries[0].created_at += 1;
        assert_ne!(base, Sha256Checksum.checksum(&entries, 2, 5));
    }

    #[test]
    fn test_canonical_shape() {
        let entries = vec![HistoryEntry::edit("a\"b", 7, None, 2)];
        let json = String::from_utf8(canonical_bytes(&entries, 0, 3)).unwrap();
        assert_eq!(
            json,
            r#"{"currentIndex":0,"entries":[{"value":"a\"b","timestampMs":7,"sequenceNumber":2,"version":1}],"version":3}"#
        );
    }
}
