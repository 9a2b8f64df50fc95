//! Change application.
//!
//! Folds an ordered batch of [`ChangeEvent`]s into a collection table with
//! copy-on-write semantics: the table is cloned on the first event that
//! actually changes something, and a batch that changes nothing yields no new
//! table at all. Callers compare table references to detect change.

use crate::store::CollectionTable;
use crate::types::{ChangeEvent, Document, DocumentId};
use indexmap::IndexMap;
use std::sync::Arc;

/// What a batch did to a table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Documents inserted under a new id, or replacing a different payload
    /// delivered as `added`.
    pub added: usize,
    /// Documents replaced by a structurally different payload.
    pub modified: usize,
    /// Documents actually deleted.
    pub removed: usize,
    /// Events skipped because the cached document was already identical, or
    /// the removed id was not cached.
    pub suppressed: usize,
}

impl ApplyOutcome {
    /// Whether any event mutated the table.
    pub fn changed(&self) -> bool {
        self.added + self.modified + self.removed > 0
    }
}

/// Apply `changes` in order to `table`.
///
/// Returns the replacement table when at least one event changed it, and
/// `None` when the batch was a no-op.
pub fn apply_changes(
    table: &CollectionTable,
    changes: &[ChangeEvent],
) -> (Option<CollectionTable>, ApplyOutcome) {
    let mut outcome = ApplyOutcome::default();
    // Cloned lazily on the first real change.
    let mut working: Option<IndexMap<DocumentId, Document>> = None;

    for change in changes {
        let current = working.as_ref().unwrap_or(&**table);

        match change {
            ChangeEvent::Added { document } => {
                if current.get(&document.id) == Some(document) {
                    outcome.suppressed += 1;
                    continue;
                }
                working
                    .get_or_insert_with(|| (**table).clone())
                    .insert(document.id.clone(), document.clone());
                outcome.added += 1;
            }

            ChangeEvent::Modified { document } => {
                if current.get(&document.id) == Some(document) {
                    outcome.suppressed += 1;
                    continue;
                }
                working
                    .get_or_insert_with(|| (**table).clone())
                    .insert(document.id.clone(), document.clone());
                outcome.modified += 1;
            }

            ChangeEvent::Removed { id } => {
                if !current.contains_key(id) {
                    outcome.suppressed += 1;
                    continue;
                }
                // shift_remove keeps the remaining documents in insertion order.
                working
                    .get_or_insert_with(|| (**table).clone())
                    .shift_remove(id);
                outcome.removed += 1;
            }
        }
    }

    (working.map(Arc::new), outcome)
}
