//! Normalized store and subscription registry.
//!
//! The store maps each loaded collection to an immutable, shared table of
//! documents keyed by id. Tables are replaced wholesale, never mutated in
//! place, so a reader holding a [`CollectionTable`] sees a consistent view
//! and can detect change by pointer comparison.

use crate::changes::{apply_changes, ApplyOutcome};
use crate::client::StopHandle;
use crate::types::{ChangeEvent, CollectionName, Document, DocumentId, LifecycleStatus};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One collection's documents, in insertion order.
pub type CollectionTable = Arc<IndexMap<DocumentId, Document>>;

/// Build a table from a list of documents. Later duplicates of an id win.
pub fn table_from(documents: Vec<Document>) -> CollectionTable {
    Arc::new(
        documents
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect(),
    )
}

/// A table identity captured for later comparison.
#[derive(Clone, Debug, Default)]
pub struct TableRef(Option<CollectionTable>);

impl TableRef {
    pub fn new(table: Option<CollectionTable>) -> Self {
        TableRef(table)
    }

    pub fn table(&self) -> Option<&CollectionTable> {
        self.0.as_ref()
    }
}

impl PartialEq for TableRef {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

#[derive(Default)]
struct Tables {
    tables: HashMap<CollectionName, CollectionTable>,
    /// Bumped every time a collection's table reference is replaced.
    revisions: HashMap<CollectionName, u64>,
}

#[derive(Default)]
struct Lifecycle {
    status: LifecycleStatus,
    /// Bumped by every reset, so work started before a reset can tell.
    epoch: u64,
}

/// In-memory collection name -> (id -> document) table of tables, plus the
/// global lifecycle flags.
#[derive(Default)]
pub struct NormalizedStore {
    tables: RwLock<Tables>,
    lifecycle: RwLock<Lifecycle>,
}

impl NormalizedStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Tables ---

    /// Current table for `collection`, if it has been loaded.
    pub fn table(&self, collection: CollectionName) -> Option<CollectionTable> {
        self.tables.read().tables.get(&collection).cloned()
    }

    /// Revision counter of `collection` (0 when never loaded).
    pub fn revision(&self, collection: CollectionName) -> u64 {
        self.tables
            .read()
            .revisions
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Install a fresh table built from `documents`, replacing any previous one.
    ///
    /// Returns the new revision.
    pub fn replace(&self, collection: CollectionName, documents: Vec<Document>) -> u64 {
        let table = table_from(documents);
        let mut tables = self.tables.write();
        tables.tables.insert(collection, table);
        let revision = tables.revisions.entry(collection).or_insert(0);
        *revision += 1;
        *revision
    }

    /// Apply a batch of changes to a loaded collection.
    ///
    /// The table reference is swapped only when the batch changed something.
    /// Batches for a collection that is not loaded are ignored.
    pub fn apply(&self, collection: CollectionName, changes: &[ChangeEvent]) -> ApplyOutcome {
        let mut tables = self.tables.write();
        let Some(current) = tables.tables.get(&collection) else {
            return ApplyOutcome::default();
        };

        let (next, outcome) = apply_changes(current, changes);
        if let Some(next) = next {
            tables.tables.insert(collection, next);
            *tables.revisions.entry(collection).or_insert(0) += 1;
        }
        outcome
    }

    /// Whether `collection` has been loaded at least once since the last reset.
    pub fn is_loaded(&self, collection: CollectionName) -> bool {
        self.tables.read().tables.contains_key(&collection)
    }

    /// Loaded collections, in declaration order.
    pub fn loaded_collections(&self) -> Vec<CollectionName> {
        let tables = self.tables.read();
        CollectionName::ALL
            .into_iter()
            .filter(|name| tables.tables.contains_key(name))
            .collect()
    }

    // --- Lifecycle ---

    /// Snapshot of the lifecycle flags.
    pub fn status(&self) -> LifecycleStatus {
        self.lifecycle.read().status.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle.read().status.initialized
    }

    /// Current reset epoch.
    pub fn epoch(&self) -> u64 {
        self.lifecycle.read().epoch
    }

    /// Enter the loading state unless a load is running or already done.
    ///
    /// Returns the epoch the load runs under, or `None` when the caller must
    /// not start a load.
    pub fn begin_loading(&self) -> Option<u64> {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.status.loading || lifecycle.status.initialized {
            return None;
        }
        lifecycle.status.loading = true;
        lifecycle.status.error = None;
        Some(lifecycle.epoch)
    }

    /// Leave the loading state.
    ///
    /// Nothing happens if a reset occurred since `epoch`; returns whether the
    /// flags were updated.
    pub fn finish_loading(&self, epoch: u64, error: Option<String>) -> bool {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.epoch != epoch {
            return false;
        }
        lifecycle.status.loading = false;
        lifecycle.status.initialized = error.is_none();
        lifecycle.status.error = error;
        true
    }

    /// Record an error message without touching any other flag.
    pub fn set_error(&self, message: impl Into<String>) {
        self.lifecycle.write().status.error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.lifecycle.write().status.error = None;
    }

    /// Drop every table and reset the lifecycle flags.
    ///
    /// Returns whether there was anything to reset.
    pub fn reset(&self) -> bool {
        let mut lifecycle = self.lifecycle.write();
        let mut tables = self.tables.write();

        let had_state = !tables.tables.is_empty() || lifecycle.status != LifecycleStatus::default();

        tables.tables.clear();
        tables.revisions.clear();
        lifecycle.status = LifecycleStatus::default();
        lifecycle.epoch += 1;
        had_state
    }
}

struct Slot {
    generation: u64,
    /// `None` while the subscribe call for this generation is in flight.
    handle: Option<StopHandle>,
}

/// Per-collection stop handles.
///
/// Each installed listener is tagged with a generation. Only the listener
/// whose generation is current for its collection may write to the store.
pub struct SubscriptionRegistry {
    slots: Mutex<HashMap<CollectionName, Slot>>,
    next_generation: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Make a new generation current for `collection`.
    ///
    /// Returns the generation and the previous stop handle, if any. The caller
    /// stops the previous handle.
    pub fn reserve(&self, collection: CollectionName) -> (u64, Option<StopHandle>) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let previous = self.slots.lock().insert(
            collection,
            Slot {
                generation,
                handle: None,
            },
        );
        (generation, previous.and_then(|slot| slot.handle))
    }

    /// Attach the stop handle for a reserved generation.
    ///
    /// Gives the handle back when the generation is no longer current.
    pub fn attach(
        &self,
        collection: CollectionName,
        generation: u64,
        handle: StopHandle,
    ) -> std::result::Result<(), StopHandle> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&collection) {
            Some(slot) if slot.generation == generation => {
                slot.handle = Some(handle);
                Ok(())
            }
            _ => Err(handle),
        }
    }

    /// Drop a reservation whose subscribe call failed.
    pub fn release(&self, collection: CollectionName, generation: u64) {
        let mut slots = self.slots.lock();
        if slots
            .get(&collection)
            .is_some_and(|slot| slot.generation == generation)
        {
            slots.remove(&collection);
        }
    }

    /// Whether `generation` is the current listener for `collection`.
    pub fn is_current(&self, collection: CollectionName, generation: u64) -> bool {
        self.slots
            .lock()
            .get(&collection)
            .is_some_and(|slot| slot.generation == generation)
    }

    /// Remove the entry for `collection`, returning its handle.
    pub fn take(&self, collection: CollectionName) -> Option<StopHandle> {
        self.slots
            .lock()
            .remove(&collection)
            .and_then(|slot| slot.handle)
    }

    /// Remove every entry, returning all handles.
    pub fn drain(&self) -> Vec<StopHandle> {
        self.slots
            .lock()
            .drain()
            .filter_map(|(_, slot)| slot.handle)
            .collect()
    }

    /// Whether `collection` has a live listener.
    pub fn contains(&self, collection: CollectionName) -> bool {
        self.slots
            .lock()
            .get(&collection)
            .is_some_and(|slot| slot.handle.is_some())
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.handle.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn topics() -> Vec<Document> {
        vec![
            Document::new("t1", json!({"topic": "Health"})),
            Document::new("t2", json!({"topic": "Finance"})),
        ]
    }

    fn counting_handle(collection: CollectionName, counter: &Arc<AtomicUsize>) -> StopHandle {
        let counter = Arc::clone(counter);
        StopHandle::new(collection, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_unloaded_collection_has_no_table() {
        let store = NormalizedStore::new();
        assert!(store.table(CollectionName::Users).is_none());
        assert!(!store.is_loaded(CollectionName::Users));
        assert_eq!(store.revision(CollectionName::Users), 0);
    }

    #[test]
    fn test_replace_installs_fresh_table() {
        let store = NormalizedStore::new();
        store.replace(CollectionName::Topics, topics());
        let first = store.table(CollectionName::Topics).unwrap();

        store.replace(CollectionName::Topics, vec![]);
        let second = store.table(CollectionName::Topics).unwrap();

        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(store.revision(CollectionName::Topics), 2);
        assert_eq!(store.loaded_collections(), vec![CollectionName::Topics]);
    }

    #[test]
    fn test_noop_apply_keeps_reference() {
        let store = NormalizedStore::new();
        store.replace(CollectionName::Topics, topics());
        let before = store.table(CollectionName::Topics).unwrap();

        let outcome = store.apply(
            CollectionName::Topics,
            &[ChangeEvent::modified(Document::new("t1", json!({"topic": "Health"})))],
        );

        let after = store.table(CollectionName::Topics).unwrap();
        assert!(!outcome.changed());
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(store.revision(CollectionName::Topics), 1);
    }

    #[test]
    fn test_apply_to_unloaded_collection_is_ignored() {
        let store = NormalizedStore::new();
        let outcome = store.apply(
            CollectionName::Comments,
            &[ChangeEvent::added(Document::new("c1", json!({})))],
        );
        assert!(!outcome.changed());
        assert!(!store.is_loaded(CollectionName::Comments));
    }

    #[test]
    fn test_begin_loading_is_exclusive() {
        let store = NormalizedStore::new();
        let epoch = store.begin_loading().unwrap();
        assert!(store.begin_loading().is_none());

        assert!(store.finish_loading(epoch, None));
        assert!(store.is_initialized());
        assert!(store.begin_loading().is_none());
    }

    #[test]
    fn test_finish_loading_after_reset_is_ignored() {
        let store = NormalizedStore::new();
        let epoch = store.begin_loading().unwrap();
        store.replace(CollectionName::Users, vec![]);

        assert!(store.reset());
        assert!(!store.finish_loading(epoch, None));
        assert_eq!(store.status(), LifecycleStatus::default());
        assert!(store.loaded_collections().is_empty());
    }

    #[test]
    fn test_failed_load_records_error() {
        let store = NormalizedStore::new();
        let epoch = store.begin_loading().unwrap();
        store.finish_loading(epoch, Some("boom".to_string()));

        let status = store.status();
        assert!(!status.loading);
        assert!(!status.initialized);
        assert_eq!(status.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_reset_of_empty_store() {
        let store = NormalizedStore::new();
        assert!(!store.reset());
    }

    #[test]
    fn test_registry_reserve_returns_previous() {
        let registry = SubscriptionRegistry::new();
        let stops = Arc::new(AtomicUsize::new(0));

        let (first, previous) = registry.reserve(CollectionName::Threads);
        assert!(previous.is_none());
        registry
            .attach(CollectionName::Threads, first, counting_handle(CollectionName::Threads, &stops))
            .unwrap();
        assert!(registry.contains(CollectionName::Threads));

        let (second, previous) = registry.reserve(CollectionName::Threads);
        assert!(second > first);
        assert!(!registry.is_current(CollectionName::Threads, first));
        assert!(registry.is_current(CollectionName::Threads, second));

        // The in-flight reservation does not count as live.
        assert_eq!(registry.len(), 0);
        drop(previous);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registry_attach_stale_generation() {
        let registry = SubscriptionRegistry::new();
        let stops = Arc::new(AtomicUsize::new(0));

        let (stale, _) = registry.reserve(CollectionName::Users);
        let (_current, _) = registry.reserve(CollectionName::Users);

        let rejected = registry
            .attach(CollectionName::Users, stale, counting_handle(CollectionName::Users, &stops))
            .unwrap_err();
        assert_eq!(rejected.collection(), CollectionName::Users);
    }

    #[test]
    fn test_registry_drain() {
        let registry = SubscriptionRegistry::new();
        let stops = Arc::new(AtomicUsize::new(0));

        for name in [CollectionName::Users, CollectionName::Topics] {
            let (generation, _) = registry.reserve(name);
            registry
                .attach(name, generation, counting_handle(name, &stops))
                .unwrap();
        }
        assert_eq!(registry.len(), 2);

        let handles = registry.drain();
        assert_eq!(handles.len(), 2);
        assert!(registry.is_empty());
        drop(handles);
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_registry_release() {
        let registry = SubscriptionRegistry::new();
        let (generation, _) = registry.reserve(CollectionName::Leaderboard);
        registry.release(CollectionName::Leaderboard, generation);
        assert!(!registry.is_current(CollectionName::Leaderboard, generation));
    }
}
