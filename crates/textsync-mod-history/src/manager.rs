/// Undo/redo manager for a single text field on one device.
///
/// The manager owns the live history list exclusively. All mutation happens
/// through `&mut self`, so a single writer is enforced by the borrow checker
/// rather than by locks. The only shared piece is the checksum cache, which
/// a background thread may fill via `precompute_checksum`.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::checksum::{ChecksumAlgorithm, Sha256Checksum};
use crate::codec::check_shape;
use crate::config::HistoryConfig;
use crate::entry::{HistoryEntry, HistoryState};
use crate::error::{HistoryError, Result};
use crate::merge::{merge_history_states, verify_checksum};

/// Millisecond wall clock, injectable for tests.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Cached digest of the live state.
///
/// `revision` advances on every mutation; a digest is fresh only when it
/// was computed for the current revision.
#[derive(Debug, Default)]
struct ChecksumCache {
    revision: u64,
    digest: Option<(u64, String)>,
}

impl ChecksumCache {
    fn fresh(&self) -> Option<&str> {
        match &self.digest {
            Some((rev, digest)) if *rev == self.revision => Some(digest),
            _ => None,
        }
    }
}

fn lock(cache: &Mutex<ChecksumCache>) -> MutexGuard<'_, ChecksumCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Manages the undo/redo history of one text field.
///
/// Each editable field gets its own `UndoRedoManager`; there is no shared
/// registry.
pub struct UndoRedoManager {
    /// History, oldest first.
    entries: Vec<HistoryEntry>,
    /// Active entry, `-1` when empty.
    current_index: i64,
    version: i64,
    /// Next local sequence number. Never rewinds, even on `clear`.
    next_seq: i64,
    device_id: Option<String>,
    /// Set by undo/redo and suppressed remote applies so the echoed field
    /// update is not recorded as a new edit.
    navigating: bool,
    config: HistoryConfig,
    algo: Arc<dyn ChecksumAlgorithm>,
    cache: Arc<Mutex<ChecksumCache>>,
    clock: Clock,
}

impl std::fmt::Debug for UndoRedoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoRedoManager")
            .field("device_id", &self.device_id)
            .field("entries_len", &self.entries.len())
            .field("current_index", &self.current_index)
            .field("version", &self.version)
            .field("next_seq", &self.next_seq)
            .field("navigating", &self.navigating)
            .finish()
    }
}

impl UndoRedoManager {
    /// Creates an empty manager for the given device.
    ///
    /// The device id is lowercased; it only breaks ordering ties.
    pub fn new(
        device_id: Option<String>,
        config: HistoryConfig,
        algo: Arc<dyn ChecksumAlgorithm>,
    ) -> Self {
        Self {
            entries: Vec::new(),
            current_index: -1,
            version: 0,
            next_seq: 0,
            device_id: device_id.map(|id| id.trim().to_lowercase()),
            navigating: false,
            config,
            algo,
            cache: Arc::new(Mutex::new(ChecksumCache::default())),
            clock: Arc::new(system_clock),
        }
    }

    /// Creates a manager with default config and SHA-256 checksums.
    ///
    /// Convenience constructor for tests and simple usage.
    pub fn in_memory(device_id: &str) -> Self {
        Self::new(
            Some(device_id.to_string()),
            HistoryConfig::default(),
            Arc::new(Sha256Checksum),
        )
    }

    /// Replaces the wall clock used to timestamp new entries.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn current_index(&self) -> i64 {
        self.current_index
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Text of the active entry.
    pub fn current_value(&self) -> Option<&str> {
        usize::try_from(self.current_index)
            .ok()
            .and_then(|idx| self.entries.get(idx))
            .map(|e| e.value.as_str())
    }

    pub fn can_undo(&self) -> bool {
        self.current_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.current_index >= 0 && self.current_index + 1 < self.entries.len() as i64
    }

    /// Whether a navigation echo is still expected.
    pub fn is_navigating(&self) -> bool {
        self.navigating
    }

    /// Ends a navigation without waiting for the echoed field update.
    pub fn end_navigation(&mut self) {
        self.navigating = false;
    }

    fn take_seq(&mut self) -> i64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        seq
    }

    fn mark_stale(&mut self) {
        lock(&self.cache).revision += 1;
    }

    /// Records the field's text as a new history entry.
    ///
    /// Skipped when the text equals the active entry. While navigating, an
    /// update that matches the active entry is the echo of that navigation
    /// and only ends it; any other text ends the navigation and is recorded.
    /// Recording drops the redo branch and trims the oldest entries past
    /// the cap.
    pub fn save_state(&mut self, text: &str) {
        if self.navigating {
            self.navigating = false;
            if self.current_value() == Some(text) {
                tracing::trace!("Ignoring navigation echo");
                return;
            }
        }
        if self.current_value() == Some(text) {
            return;
        }

        let keep = usize::try_from(self.current_index + 1).unwrap_or(0);
        self.entries.truncate(keep);

        let created_at = (self.clock)();
        let seq = self.take_seq();
        self.entries
            .push(HistoryEntry::edit(text, created_at, self.device_id.clone(), seq));

        if self.entries.len() > self.config.max_entries {
            let excess = self.entries.len() - self.config.max_entries;
            self.entries.drain(..excess);
        }
        self.current_index = self.entries.len() as i64 - 1;
        self.mark_stale();
    }

    fn navigate(&mut self, step: i64) -> Result<String> {
        let target = self.current_index + step;
        if self.current_index < 0 || target < 0 || target >= self.entries.len() as i64 {
            return Err(HistoryError::EmptyHistoryNavigation);
        }
        self.current_index = target;
        self.navigating = true;
        self.mark_stale();
        Ok(self.entries[target as usize].value.clone())
    }

    /// Steps back one entry and returns its text.
    ///
    /// Returns `None` if there's nothing to undo.
    pub fn undo(&mut self) -> Option<String> {
        self.navigate(-1)
            .map_err(|e| tracing::debug!("Undo skipped: {e}"))
            .ok()
    }

    /// Steps forward one entry and returns its text.
    ///
    /// Returns `None` if there's nothing to redo.
    pub fn redo(&mut self) -> Option<String> {
        self.navigate(1)
            .map_err(|e| tracing::debug!("Redo skipped: {e}"))
            .ok()
    }

    /// Bulk-loads an existing ordered list of texts, e.g. on cold start.
    ///
    /// Entries get synthetic increasing timestamps ending at "now" and fresh
    /// sequence numbers. Adjacent duplicates collapse into one entry. The
    /// pointer lands on `index` (clamped), or on the newest entry.
    pub fn initialize_history<I, S>(&mut self, values: I, index: Option<usize>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let now = (self.clock)();
        let count = values.len() as i64;

        let mut entries: Vec<HistoryEntry> = Vec::with_capacity(values.len());
        let mut index_map = Vec::with_capacity(values.len());
        for (i, value) in values.into_iter().enumerate() {
            if entries.last().is_some_and(|e| e.value == value) {
                index_map.push(entries.len() - 1);
                continue;
            }
            let created_at = now - (count - 1 - i as i64);
            let seq = self.take_seq();
            entries.push(HistoryEntry::init(&value, created_at, self.device_id.clone(), seq));
            index_map.push(entries.len() - 1);
        }

        let requested = match (index, index_map.last()) {
            (Some(i), Some(_)) => index_map[i.min(index_map.len() - 1)],
            (None, Some(&last)) => last,
            (_, None) => 0,
        };

        let excess = entries.len().saturating_sub(self.config.max_entries);
        entries.drain(..excess);

        self.current_index = if entries.is_empty() {
            -1
        } else {
            requested.saturating_sub(excess) as i64
        };
        self.entries = entries;
        self.navigating = false;
        self.mark_stale();
    }

    /// Replaces the history with a single entry holding `text`.
    pub fn reset(&mut self, text: &str) {
        let created_at = (self.clock)();
        let seq = self.take_seq();
        self.entries = vec![HistoryEntry::init(text, created_at, self.device_id.clone(), seq)];
        self.current_index = 0;
        self.navigating = false;
        self.mark_stale();
    }

    /// Empties the history. The sequence counter keeps counting.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.current_index = -1;
        self.navigating = false;
        self.mark_stale();
    }

    /// Returns the live state with its checksum.
    ///
    /// Uses the cached digest when it is fresh, otherwise computes it
    /// synchronously and caches it.
    pub fn export_state(&self) -> HistoryState {
        HistoryState {
            entries: self.entries.clone(),
            current_index: self.current_index,
            version: self.version,
            checksum: self.checksum(),
        }
    }

    /// Checksum of the live state.
    pub fn checksum(&self) -> String {
        let revision = {
            let cache = lock(&self.cache);
            if let Some(digest) = cache.fresh() {
                return digest.to_string();
            }
            cache.revision
        };

        tracing::debug!("Checksum cache stale, computing synchronously");
        let digest = self
            .algo
            .checksum(&self.entries, self.current_index, self.version);
        let mut cache = lock(&self.cache);
        if cache.revision == revision {
            cache.digest = Some((revision, digest.clone()));
        }
        digest
    }

    /// Whether `export_state` would have to hash synchronously.
    pub fn is_checksum_stale(&self) -> bool {
        lock(&self.cache).fresh().is_none()
    }

    /// Computes the checksum of the current state on a background thread.
    ///
    /// Meant to run right after `save_state` so the cache is warm before a
    /// sync is requested. A result computed for a state that has since
    /// changed is discarded. Returns `None` when the cache is already fresh.
    pub fn precompute_checksum(&self) -> Option<JoinHandle<()>> {
        let revision = {
            let cache = lock(&self.cache);
            if cache.fresh().is_some() {
                return None;
            }
            cache.revision
        };

        let entries = self.entries.clone();
        let current_index = self.current_index;
        let version = self.version;
        let algo = Arc::clone(&self.algo);
        let cache = Arc::clone(&self.cache);

        Some(std::thread::spawn(move || {
            let digest = algo.checksum(&entries, current_index, version);
            let mut cache = lock(&cache);
            if cache.revision == revision {
                cache.digest = Some((revision, digest));
            } else {
                tracing::trace!(
                    started = revision,
                    current = cache.revision,
                    "Discarding superseded checksum"
                );
            }
        }))
    }

    /// Merges a remote state with the live state into a new canonical state.
    ///
    /// Does not modify the manager; adopt the result with
    /// `apply_remote_history_state`.
    pub fn merge_remote_history_state(&self, remote: &HistoryState) -> HistoryState {
        if let Err(e) = verify_checksum(remote, self.algo.as_ref()) {
            tracing::warn!("Remote history state failed verification: {e}");
        }
        let local = self.export_state();
        merge_history_states(&local, remote, &self.config, self.algo.as_ref())
    }

    /// Replaces the live history with an already-merged canonical state.
    ///
    /// The state is validated before anything changes. With
    /// `suppress_recording`, the field update that follows is treated as a
    /// navigation echo and not recorded. The incoming checksum is adopted
    /// as the cached digest; on a mismatch the mismatch is logged and the
    /// recomputed digest is cached instead, without blocking adoption.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatePayload` if the state is structurally invalid.
    /// The live state is untouched in that case.
    pub fn apply_remote_history_state(
        &mut self,
        state: HistoryState,
        suppress_recording: bool,
    ) -> Result<()> {
        check_shape(&state)?;
        let mut state = state;
        if state.entries.is_empty() {
            state.current_index = -1;
        }

        let digest = match verify_checksum(&state, self.algo.as_ref()) {
            Ok(()) if !state.checksum.is_empty() => state.checksum,
            Ok(()) => self.algo.state_checksum(&state),
            Err(HistoryError::ChecksumMismatch { expected, actual }) => {
                tracing::warn!(
                    expected = %expected,
                    actual = %actual,
                    "Checksum mismatch on applied history state"
                );
                actual
            }
            Err(e) => return Err(e),
        };

        let own_max_seq = self
            .entries
            .iter()
            .chain(state.entries.iter())
            .filter(|e| e.device_id.is_some() && e.device_id == self.device_id)
            .filter_map(|e| e.sequence_number)
            .max();
        if let Some(max) = own_max_seq {
            self.next_seq = self.next_seq.max(max.saturating_add(1));
        }

        self.entries = state.entries;
        self.current_index = state.current_index;
        self.version = state.version;
        self.navigating = suppress_recording;

        let mut cache = lock(&self.cache);
        cache.revision += 1;
        cache.digest = Some((cache.revision, digest));
        Ok(())
    }
}
