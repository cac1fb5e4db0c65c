/// Text reconciliation for short, concurrently edited fields.
///
/// `merge` holds the three-way `TextMerger`; `session` ties one field's
/// live text, agreed base, and undo/redo history together.
pub mod history;
pub mod merge;
pub mod session;

pub use merge::{merge, MergeOptions, MergeResult, Resolution, TextMerger};
pub use session::FieldSession;
