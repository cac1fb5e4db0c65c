/// Cross-device history reconciliation.
///
/// Two histories are combined by concatenating their entries, ordering them
/// deterministically, dropping adjacent duplicates, and capping the result.
/// Every step is a pure function of its inputs, so two devices merging the
/// same pair of states arrive at the same canonical state.
use std::cmp::Ordering;

use crate::checksum::ChecksumAlgorithm;
use crate::config::HistoryConfig;
use crate::entry::{HistoryEntry, HistoryState};
use crate::error::{HistoryError, Result};

/// Orders entries for a canonical history.
///
/// Entries that carry a sequence number are grouped into time windows: a
/// window opens at its oldest entry and holds every following entry created
/// within `tolerance_ms` of that opener. Windows are ordered by time. Inside
/// a window entries are treated as concurrent and ordered by device id,
/// then by sequence number.
///
/// A device's sequence numbers win over its clock: before windowing, each
/// entry's time is raised to the newest time of that device's lower
/// sequence numbers, so a clock that jumped backwards cannot reorder one
/// device's edits.
///
/// Entries without a sequence number take no part in windowing and order
/// by their own timestamp.
///
/// Every entry gets a sort key, so the result is a total order over the
/// multiset of entries and independent of input order.
pub fn sort_entries(entries: &mut [HistoryEntry], tolerance_ms: i64) {
    let tolerance = u64::try_from(tolerance_ms).unwrap_or(0);
    entries.sort_by(compare_exact);

    let mut effective: Vec<i64> = entries.iter().map(|e| e.created_at).collect();
    let mut sequenced: Vec<usize> = (0..entries.len())
        .filter(|&i| entries[i].sequence_number.is_some())
        .collect();

    sequenced.sort_by(|&a, &b| {
        let (x, y) = (&entries[a], &entries[b]);
        x.device_key()
            .cmp(y.device_key())
            .then_with(|| x.sequence_number.cmp(&y.sequence_number))
            .then_with(|| compare_exact(x, y))
    });
    let mut floor: Option<(&str, i64)> = None;
    for &i in &sequenced {
        let device = entries[i].device_key();
        let at = match floor {
            Some((prev, newest)) if prev == device => newest.max(entries[i].created_at),
            _ => entries[i].created_at,
        };
        effective[i] = at;
        floor = Some((device, at));
    }

    sequenced.sort_by(|&a, &b| {
        effective[a]
            .cmp(&effective[b])
            .then_with(|| compare_exact(&entries[a], &entries[b]))
    });
    let mut primary = effective.clone();
    let mut opened_at: Option<i64> = None;
    for &i in &sequenced {
        let start = match opened_at {
            Some(start) if effective[i].abs_diff(start) <= tolerance => start,
            _ => effective[i],
        };
        opened_at = Some(start);
        primary[i] = start;
    }

    let mut keyed: Vec<(i64, HistoryEntry)> =
        primary.into_iter().zip(entries.iter().cloned()).collect();
    keyed.sort_by(|(pa, a), (pb, b)| {
        pa.cmp(pb)
            .then_with(|| a.device_key().cmp(b.device_key()))
            .then_with(|| a.sequence_number.cmp(&b.sequence_number))
            .then_with(|| compare_exact(a, b))
    });

    for (slot, (_, entry)) in entries.iter_mut().zip(keyed) {
        *slot = entry;
    }
}

/// Strict total order on every field, oldest first.
fn compare_exact(a: &HistoryEntry, b: &HistoryEntry) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.device_key().cmp(b.device_key()))
        .then_with(|| a.sequence_number.cmp(&b.sequence_number))
        .then_with(|| a.value.cmp(&b.value))
        .then_with(|| a.version.cmp(&b.version))
        .then_with(|| a.op_type.map(|t| t as u8).cmp(&b.op_type.map(|t| t as u8)))
}

/// Drops every entry whose value equals the previously kept entry's value.
pub fn dedup_adjacent(entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
    let mut deduped: Vec<HistoryEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        if let Some(last) = deduped.last() {
            if last.value == entry.value {
                continue;
            }
        }
        deduped.push(entry);
    }
    deduped
}

/// Keeps the newest `max_entries` entries.
pub fn cap_entries(mut entries: Vec<HistoryEntry>, max_entries: usize) -> Vec<HistoryEntry> {
    if entries.len() > max_entries {
        let excess = entries.len() - max_entries;
        entries.drain(..excess);
    }
    entries
}

fn normalize_device_ids(entries: &mut [HistoryEntry]) {
    for entry in entries.iter_mut() {
        if let Some(id) = entry.device_id.as_mut() {
            if id.chars().any(char::is_uppercase) {
                *id = id.to_lowercase();
            }
        }
    }
}

/// Combines a local and a remote history into one canonical state.
///
/// Neither input is modified. The result carries
/// `version = max(local.version, remote.version) + 1`, an active pointer
/// chosen by `config.index_policy`, and a fresh checksum.
pub fn merge_history_states(
    local: &HistoryState,
    remote: &HistoryState,
    config: &HistoryConfig,
    algo: &dyn ChecksumAlgorithm,
) -> HistoryState {
    let mut combined: Vec<HistoryEntry> =
        Vec::with_capacity(local.entries.len() + remote.entries.len());
    combined.extend(local.entries.iter().cloned());
    combined.extend(remote.entries.iter().cloned());
    let combined_len = combined.len();

    normalize_device_ids(&mut combined);
    sort_entries(&mut combined, config.timestamp_tolerance_ms);
    let entries = cap_entries(dedup_adjacent(combined), config.max_entries);

    let current_index = config.index_policy.resolve(
        &entries,
        local.current_entry(),
        local.newest_timestamp(),
    );
    let version = local.version.max(remote.version).saturating_add(1);
    let checksum = algo.checksum(&entries, current_index, version);

    tracing::debug!(
        local = local.entries.len(),
        remote = remote.entries.len(),
        combined = combined_len,
        merged = entries.len(),
        version,
        "Merged history states"
    );

    HistoryState {
        entries,
        current_index,
        version,
        checksum,
    }
}

/// Repairs a state so it satisfies the history invariants.
///
/// Lowercases device ids, reorders, drops adjacent duplicates, caps, and
/// re-locates the active pointer onto the same logical entry. The checksum
/// is recomputed only when something was repaired.
pub fn validate_state(
    state: HistoryState,
    config: &HistoryConfig,
    algo: &dyn ChecksumAlgorithm,
) -> HistoryState {
    let HistoryState {
        mut entries,
        current_index,
        version,
        checksum,
    } = state;

    if entries.is_empty() {
        let repaired = current_index != -1;
        if repaired {
            tracing::warn!("History state repaired: clamped index {current_index} -> -1");
        }
        return HistoryState {
            entries,
            current_index: -1,
            version,
            checksum: if repaired {
                algo.checksum(&[], -1, version)
            } else {
                checksum
            },
        };
    }

    let mut repairs = Vec::new();
    let original = entries.clone();

    let pre_index = current_index.clamp(0, entries.len() as i64 - 1) as usize;
    normalize_device_ids(&mut entries);
    let current_key = entries[pre_index].clone();

    sort_entries(&mut entries, config.timestamp_tolerance_ms);
    let sorted_len = entries.len();
    let deduped = dedup_adjacent(entries);
    if deduped.len() != sorted_len {
        repairs.push(format!("deduplicated {} -> {} entries", sorted_len, deduped.len()));
    }
    let deduped_len = deduped.len();
    let entries = cap_entries(deduped, config.max_entries);
    if entries.len() != deduped_len {
        repairs.push(format!("trimmed {} -> {} entries", deduped_len, entries.len()));
    }

    let last = entries.len() as i64 - 1;
    let index = entries
        .iter()
        .position(|e| e.same_origin(&current_key))
        .or_else(|| entries.iter().rposition(|e| e.value == current_key.value))
        .map_or(current_index.clamp(0, last), |idx| idx as i64);
    if index != current_index {
        repairs.push(format!("clamped index {current_index} -> {index}"));
    }
    if entries != original && repairs.is_empty() {
        repairs.push("reordered entries".to_string());
    }

    if repairs.is_empty() {
        return HistoryState {
            entries,
            current_index: index,
            version,
            checksum,
        };
    }

    tracing::warn!("History state repaired: {}", repairs.join(", "));
    let checksum = algo.checksum(&entries, index, version);
    HistoryState {
        entries,
        current_index: index,
        version,
        checksum,
    }
}

/// Checks the asserted checksum of a state.
///
/// An empty asserted checksum is accepted: it means the sender did not
/// compute one.
pub fn verify_checksum(state: &HistoryState, algo: &dyn ChecksumAlgorithm) -> Result<()> {
    if state.checksum.is_empty() {
        return Ok(());
    }
    let actual = algo.state_checksum(state);
    if actual == state.checksum {
        Ok(())
    } else {
        Err(HistoryError::ChecksumMismatch {
            expected: state.checksum.clone(),
            actual,
        })
    }
}
