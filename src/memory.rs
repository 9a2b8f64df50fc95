//! In-process document repository.
//!
//! [`MemoryRepository`] implements [`RepositoryClient`] over plain in-memory
//! tables. Writes through its mutation helpers update the remote state and
//! notify every attached listener synchronously, in call order. It also
//! counts fetches and subscriptions and can be told to fail, which makes it
//! the backing client for tests, demos and benchmarks.

use crate::client::{BatchListener, ListenEvent, RepositoryClient, StopHandle};
use crate::error::{CacheError, Result};
use crate::types::{ChangeBatch, ChangeEvent, CollectionName, Document, DocumentId};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct RemoteState {
    /// Remote documents per collection.
    tables: HashMap<CollectionName, IndexMap<DocumentId, Document>>,
    /// Attached listeners per collection, keyed by listener id.
    listeners: HashMap<CollectionName, Vec<(u64, BatchListener)>>,
    /// Injected fetch failures.
    fetch_failures: HashMap<CollectionName, String>,
    /// Injected subscribe failures.
    subscribe_failures: HashMap<CollectionName, String>,
    fetch_counts: HashMap<CollectionName, usize>,
    subscribe_counts: HashMap<CollectionName, usize>,
}

/// In-memory [`RepositoryClient`].
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<RemoteState>>,
    next_listener_id: Arc<AtomicU64>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote contents of a collection without notifying listeners.
    pub fn seed(&self, collection: CollectionName, documents: Vec<Document>) {
        let table = documents
            .into_iter()
            .map(|doc| (doc.id.clone(), doc))
            .collect();
        self.state.lock().tables.insert(collection, table);
    }

    /// Insert a document remotely and push an `added` event.
    pub fn add(&self, collection: CollectionName, document: Document) {
        self.state
            .lock()
            .tables
            .entry(collection)
            .or_default()
            .insert(document.id.clone(), document.clone());
        self.emit(collection, ChangeBatch::new(vec![ChangeEvent::added(document)]));
    }

    /// Replace a document remotely and push a `modified` event.
    pub fn modify(&self, collection: CollectionName, document: Document) {
        self.state
            .lock()
            .tables
            .entry(collection)
            .or_default()
            .insert(document.id.clone(), document.clone());
        self.emit(
            collection,
            ChangeBatch::new(vec![ChangeEvent::modified(document)]),
        );
    }

    /// Delete a document remotely and push a `removed` event.
    pub fn remove(&self, collection: CollectionName, id: impl Into<DocumentId>) {
        let id = id.into();
        if let Some(table) = self.state.lock().tables.get_mut(&collection) {
            table.shift_remove(&id);
        }
        self.emit(collection, ChangeBatch::new(vec![ChangeEvent::removed(id)]));
    }

    /// Deliver a raw batch to every listener of `collection`.
    ///
    /// Remote contents are left as they are.
    pub fn emit(&self, collection: CollectionName, batch: ChangeBatch) {
        self.notify(collection, ListenEvent::Batch(batch));
    }

    /// Report a channel error to every listener of `collection`.
    pub fn emit_error(&self, collection: CollectionName, message: impl Into<String>) {
        self.notify(collection, ListenEvent::Error(message.into()));
    }

    fn notify(&self, collection: CollectionName, event: ListenEvent) {
        // Listeners run outside the lock so they may call back in.
        let listeners: Vec<BatchListener> = self
            .state
            .lock()
            .listeners
            .get(&collection)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(event.clone());
        }
    }

    /// Make every subsequent fetch of `collection` fail.
    pub fn fail_fetch(&self, collection: CollectionName, message: impl Into<String>) {
        self.state
            .lock()
            .fetch_failures
            .insert(collection, message.into());
    }

    /// Make every subsequent subscribe to `collection` fail.
    pub fn fail_subscribe(&self, collection: CollectionName, message: impl Into<String>) {
        self.state
            .lock()
            .subscribe_failures
            .insert(collection, message.into());
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fetch_failures.clear();
        state.subscribe_failures.clear();
    }

    /// Number of `fetch_all` calls made for `collection`.
    pub fn fetch_count(&self, collection: CollectionName) -> usize {
        self.state
            .lock()
            .fetch_counts
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `subscribe` calls made for `collection`.
    pub fn subscribe_count(&self, collection: CollectionName) -> usize {
        self.state
            .lock()
            .subscribe_counts
            .get(&collection)
            .copied()
            .unwrap_or(0)
    }

    /// Number of listeners currently attached to `collection`.
    pub fn active_listeners(&self, collection: CollectionName) -> usize {
        self.state
            .lock()
            .listeners
            .get(&collection)
            .map_or(0, Vec::len)
    }

    /// Total listeners attached across all collections.
    pub fn total_listeners(&self) -> usize {
        self.state.lock().listeners.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl RepositoryClient for MemoryRepository {
    async fn fetch_all(&self, collection: CollectionName) -> Result<Vec<Document>> {
        {
            let mut state = self.state.lock();
            *state.fetch_counts.entry(collection).or_default() += 1;
        }

        // Suspend once, like a network round trip would.
        tokio::task::yield_now().await;

        let state = self.state.lock();
        if let Some(message) = state.fetch_failures.get(&collection) {
            return Err(CacheError::Fetch {
                collection,
                message: message.clone(),
            });
        }

        Ok(state
            .tables
            .get(&collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default())
    }

    fn subscribe(&self, collection: CollectionName, listener: BatchListener) -> Result<StopHandle> {
        let mut state = self.state.lock();
        *state.subscribe_counts.entry(collection).or_default() += 1;

        if let Some(message) = state.subscribe_failures.get(&collection) {
            return Err(CacheError::Subscribe {
                collection,
                message: message.clone(),
            });
        }

        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        state
            .listeners
            .entry(collection)
            .or_default()
            .push((id, listener));

        let remote = Arc::clone(&self.state);
        Ok(StopHandle::new(collection, move || {
            if let Some(list) = remote.lock().listeners.get_mut(&collection) {
                list.retain(|(listener_id, _)| *listener_id != id);
            }
        }))
    }
}
