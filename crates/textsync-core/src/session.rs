/// Per-field editing session: live text, last agreed base, and history.
///
/// A `FieldSession` is constructed explicitly for each editable field and
/// owns everything that field needs to reconcile with other devices. There
/// is no process-wide registry.
use std::sync::Arc;

use crate::history::{
    ChecksumAlgorithm, HistoryConfig, HistoryError, HistoryState, Sha256Checksum, UndoRedoManager,
};
use crate::merge::{MergeOptions, MergeResult, TextMerger};

pub struct FieldSession {
    field_id: String,
    text: String,
    /// Last text both sides are known to have agreed on.
    base: String,
    history: UndoRedoManager,
    merger: TextMerger,
}

impl std::fmt::Debug for FieldSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSession")
            .field("field_id", &self.field_id)
            .field("text_len", &self.text.len())
            .field("history", &self.history)
            .finish()
    }
}

impl FieldSession {
    /// Creates a session whose text and base both start as `initial`.
    pub fn new(
        field_id: impl Into<String>,
        initial: &str,
        device_id: Option<String>,
        history_config: HistoryConfig,
        merge_options: MergeOptions,
        algo: Arc<dyn ChecksumAlgorithm>,
    ) -> Self {
        let history = UndoRedoManager::new(device_id, history_config, algo);
        Self::with_history(field_id, initial, history, merge_options)
    }

    /// Creates a session around an existing history manager.
    ///
    /// The history is reset to `initial` if it is empty.
    pub fn with_history(
        field_id: impl Into<String>,
        initial: &str,
        mut history: UndoRedoManager,
        merge_options: MergeOptions,
    ) -> Self {
        if history.entries().is_empty() {
            history.reset(initial);
        }
        Self {
            field_id: field_id.into(),
            text: initial.to_string(),
            base: initial.to_string(),
            history,
            merger: TextMerger::new(merge_options),
        }
    }

    /// Session with default config and SHA-256 checksums.
    pub fn in_memory(field_id: impl Into<String>, initial: &str, device_id: &str) -> Self {
        Self::new(
            field_id,
            initial,
            Some(device_id.to_string()),
            HistoryConfig::default(),
            MergeOptions::default(),
            Arc::new(Sha256Checksum),
        )
    }

    pub fn field_id(&self) -> &str {
        &self.field_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn history(&self) -> &UndoRedoManager {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut UndoRedoManager {
        &mut self.history
    }

    /// Records a local edit.
    pub fn edit(&mut self, text: &str) {
        self.text = text.to_string();
        self.history.save_state(text);
    }

    /// Undoes the last edit and returns the restored text.
    pub fn undo(&mut self) -> Option<String> {
        let text = self.history.undo()?;
        self.show(&text);
        Some(text)
    }

    /// Redoes the next edit and returns the restored text.
    pub fn redo(&mut self) -> Option<String> {
        let text = self.history.redo()?;
        self.show(&text);
        Some(text)
    }

    /// Puts text into the field the way an editor would, feeding the
    /// resulting update back to the history so a navigation echo is
    /// consumed instead of recorded.
    fn show(&mut self, text: &str) {
        self.text = text.to_string();
        self.history.save_state(text);
    }

    /// Three-way merges the live text with a remote buffer against the last
    /// agreed base.
    ///
    /// The merged text becomes the live text and the new base, and is
    /// recorded in the history. `cursor` is a char offset into the live text.
    pub fn reconcile_text(&mut self, remote: &str, cursor: usize) -> MergeResult {
        let (result, resolution) = self
            .merger
            .merge_explained(&self.base, &self.text, remote, cursor);
        tracing::debug!(
            field = %self.field_id,
            ?resolution,
            cursor = result.cursor,
            "Reconciled field text"
        );

        self.history.end_navigation();
        self.text.clone_from(&result.text);
        self.base.clone_from(&result.text);
        self.history.save_state(&result.text);
        result
    }

    /// Merges a remote history into this session and adopts the result.
    ///
    /// The live text and base follow the merged state's active entry.
    /// Returns the adopted canonical state for forwarding to other devices.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatePayload` if the merged state cannot be applied;
    /// the session is unchanged in that case.
    pub fn sync_history(&mut self, remote: &HistoryState) -> Result<HistoryState, HistoryError> {
        let merged = self.history.merge_remote_history_state(remote);
        self.adopt(merged.clone())?;
        Ok(merged)
    }

    /// Adopts an already-merged canonical state, e.g. one received from
    /// another device or loaded from a store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatePayload` if the state is structurally invalid.
    pub fn adopt(&mut self, state: HistoryState) -> Result<(), HistoryError> {
        self.history.apply_remote_history_state(state, true)?;
        match self.history.current_value().map(str::to_string) {
            Some(text) => {
                self.base.clone_from(&text);
                self.show(&text);
            }
            None => self.history.end_navigation(),
        }
        Ok(())
    }

    /// Current history state with its checksum.
    pub fn export_state(&self) -> HistoryState {
        self.history.export_state()
    }
}
