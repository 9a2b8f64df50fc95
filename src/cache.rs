//! Main SyncCache struct tying all components together.

use crate::client::{BatchListener, ListenEvent, RepositoryClient};
use crate::error::{CacheError, Result};
use crate::notify::{NotificationManager, WatchConfig, WatchHandle, WatchId};
use crate::query::{self, DocumentFilter};
use crate::schema::{self, CollectionDocument};
use crate::store::{CollectionTable, NormalizedStore, SubscriptionRegistry};
use crate::types::{CollectionName, Document, DocumentId, LifecycleStatus};
use futures::future::join_all;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Collections loaded by `initialize`.
    pub collections: Vec<CollectionName>,

    /// Ignore batches that echo a pending local write.
    pub ignore_pending_writes: bool,

    /// Buffer size for the watchers behind views.
    pub notification_buffer: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            collections: CollectionName::ALL.to_vec(),
            ignore_pending_writes: true,
            notification_buffer: 256,
        }
    }
}

struct CacheInner {
    /// Cache configuration.
    config: CacheConfig,

    /// Remote repository.
    client: Arc<dyn RepositoryClient>,

    /// Tables and lifecycle flags.
    store: NormalizedStore,

    /// Stop handles of live listeners.
    registry: SubscriptionRegistry,

    /// Store-change watchers.
    notifications: NotificationManager,

    /// Serializes loads and refreshes per collection.
    load_locks: HashMap<CollectionName, tokio::sync::Mutex<()>>,

    /// Lock for store writes, so that installs, batch application and
    /// cleanup never interleave.
    write_lock: Mutex<()>,

    /// User of the current session, if signed in.
    session_user: Mutex<Option<String>>,
}

/// The collection cache.
///
/// Mirrors the configured collections of a [`RepositoryClient`] into local
/// tables and keeps them live:
/// - `initialize` loads every collection once, concurrently
/// - push batches are folded into the tables as they arrive
/// - `refresh_collection` reloads one collection with a fresh listener
/// - `cleanup` stops every listener and drops all data
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct SyncCache {
    inner: Arc<CacheInner>,
}

impl SyncCache {
    /// Create a cache with the default configuration.
    pub fn new(client: Arc<dyn RepositoryClient>) -> Self {
        Self::with_config(client, CacheConfig::default())
    }

    /// Create a cache with a custom configuration.
    pub fn with_config(client: Arc<dyn RepositoryClient>, config: CacheConfig) -> Self {
        let load_locks = CollectionName::ALL
            .into_iter()
            .map(|name| (name, tokio::sync::Mutex::new(())))
            .collect();

        Self {
            inner: Arc::new(CacheInner {
                config,
                client,
                store: NormalizedStore::new(),
                registry: SubscriptionRegistry::new(),
                notifications: NotificationManager::new(),
                load_locks,
                write_lock: Mutex::new(()),
                session_user: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub(crate) fn session_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.inner.session_user.lock()
    }

    // --- Lifecycle ---

    /// Load every configured collection and attach its listener.
    ///
    /// Does nothing while a load is running or once one has succeeded.
    /// Collections load concurrently and all of them are awaited; if any
    /// fails, the whole call fails and the cache stays uninitialized, but
    /// the collections that did load stay loaded and live.
    pub async fn initialize(&self) -> Result<()> {
        let Some(epoch) = self.inner.store.begin_loading() else {
            debug!("initialize skipped: already loading or initialized");
            return Ok(());
        };

        let collections = self.inner.config.collections.clone();
        info!(collections = collections.len(), "initializing collection cache");

        let results = join_all(
            collections
                .iter()
                .map(|&name| async move { (name, self.load_collection(name, epoch).await) }),
        )
        .await;

        let failures: Vec<(CollectionName, String)> = results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| (name, e.to_string())))
            .collect();

        let error = if failures.is_empty() {
            None
        } else {
            Some(
                CacheError::InitializationFailed {
                    failures: failures.clone(),
                }
                .to_string(),
            )
        };

        if !self.inner.store.finish_loading(epoch, error) {
            debug!("initialize overtaken by cleanup");
            return Err(CacheError::InitializationCancelled);
        }

        if failures.is_empty() {
            info!("collection cache initialized");
            self.inner.notifications.broadcast_initialized();
            Ok(())
        } else {
            warn!(failed = failures.len(), "collection cache initialization failed");
            Err(CacheError::InitializationFailed { failures })
        }
    }

    /// Stop the listener of `name`, then load it again with a new one.
    ///
    /// Concurrent refreshes of the same collection run one after another, so
    /// at most one listener is ever live for it.
    pub async fn refresh_collection(&self, name: CollectionName) -> Result<()> {
        // Taken before queueing on the load lock, so a cleanup while we wait
        // cancels this refresh.
        let epoch = self.inner.store.epoch();
        let _guard = self.inner.load_lock(name).lock().await;

        let previous = {
            let _write = self.inner.write_lock.lock();
            if self.inner.store.epoch() != epoch {
                return Err(CacheError::Cancelled(name));
            }
            self.inner.registry.take(name)
        };
        if let Some(mut handle) = previous {
            handle.stop();
            debug!(collection = %name, "stopped listener for refresh");
        }

        let result = self.load_locked(name, epoch).await;
        match &result {
            Ok(()) => info!(collection = %name, "collection refreshed"),
            Err(CacheError::Cancelled(_)) => {}
            Err(e) => self.inner.store.set_error(e.to_string()),
        }
        result
    }

    /// Stop every listener and drop all data and flags.
    ///
    /// A later `initialize` performs a full load. Safe to call when nothing
    /// is loaded.
    pub fn cleanup(&self) {
        let (had_state, handles) = {
            let _write = self.inner.write_lock.lock();
            let had_state = self.inner.store.reset();
            (had_state, self.inner.registry.drain())
        };

        let stopped = handles.len();
        for mut handle in handles {
            handle.stop();
        }

        if had_state || stopped > 0 {
            self.inner.notifications.broadcast_cleared();
            info!(stopped, "collection cache cleaned up");
        }
    }

    // --- Loading ---

    /// Fetch one collection, install its table and attach its listener.
    ///
    /// `epoch` is the reset epoch the caller started under; the load is
    /// cancelled if a cleanup bumped it in the meantime.
    async fn load_collection(&self, name: CollectionName, epoch: u64) -> Result<()> {
        let _guard = self.inner.load_lock(name).lock().await;
        self.load_locked(name, epoch).await
    }

    /// Load body; the caller holds the collection's load lock.
    async fn load_locked(&self, name: CollectionName, epoch: u64) -> Result<()> {
        if self.inner.store.epoch() != epoch {
            return Err(CacheError::Cancelled(name));
        }

        let documents = match self.inner.client.fetch_all(name).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(collection = %name, error = %e, "fetch failed");
                return Err(e);
            }
        };
        let count = documents.len();

        // Install the table and reserve the listener slot in one step, so a
        // cleanup cannot slip in between.
        let (generation, previous) = {
            let _write = self.inner.write_lock.lock();
            if self.inner.store.epoch() != epoch {
                return Err(CacheError::Cancelled(name));
            }
            let revision = self.inner.store.replace(name, documents);
            self.inner
                .notifications
                .broadcast_collection_changed(name, revision, count);
            self.inner.registry.reserve(name)
        };
        if let Some(mut handle) = previous {
            handle.stop();
        }

        let listener = self.listener(name, generation);
        let handle = match self.inner.client.subscribe(name, listener) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(collection = %name, error = %e, "subscribe failed");
                self.inner.registry.release(name, generation);
                return Err(e);
            }
        };

        let attached = {
            let _write = self.inner.write_lock.lock();
            if self.inner.store.epoch() == epoch {
                self.inner.registry.attach(name, generation, handle)
            } else {
                Err(handle)
            }
        };
        if let Err(mut handle) = attached {
            handle.stop();
            return Err(CacheError::Cancelled(name));
        }

        debug!(collection = %name, documents = count, generation, "collection loaded");
        Ok(())
    }

    /// Build the push listener for one generation of `name`.
    fn listener(&self, name: CollectionName, generation: u64) -> BatchListener {
        let inner: Weak<CacheInner> = Arc::downgrade(&self.inner);
        Arc::new(move |event: ListenEvent| {
            if let Some(inner) = inner.upgrade() {
                inner.on_listen_event(name, generation, event);
            }
        })
    }

    // --- Status ---

    /// Snapshot of the lifecycle flags.
    pub fn status(&self) -> LifecycleStatus {
        self.inner.store.status()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.store.is_initialized()
    }

    /// Whether `name` has been loaded since the last cleanup.
    pub fn is_loaded(&self, name: CollectionName) -> bool {
        self.inner.store.is_loaded(name)
    }

    pub fn loaded_collections(&self) -> Vec<CollectionName> {
        self.inner.store.loaded_collections()
    }

    /// Whether `name` has a live listener.
    pub fn has_subscription(&self, name: CollectionName) -> bool {
        self.inner.registry.contains(name)
    }

    /// Number of live listeners.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.registry.len()
    }

    /// Revision counter of `name`; bumped on every table replacement.
    pub fn revision(&self, name: CollectionName) -> u64 {
        self.inner.store.revision(name)
    }

    /// Reset the error flag.
    pub fn clear_error(&self) {
        self.inner.store.clear_error();
    }

    // --- Queries ---

    /// Current table of `name` if it has been loaded.
    pub(crate) fn table(&self, name: CollectionName) -> Option<CollectionTable> {
        self.inner.store.table(name)
    }

    /// Full table of `name`; empty when the collection is not loaded.
    pub fn get_collection(&self, name: CollectionName) -> CollectionTable {
        self.table(name).unwrap_or_default()
    }

    /// Single document of `name`.
    pub fn get_document(&self, name: CollectionName, id: &DocumentId) -> Option<Document> {
        self.table(name)
            .and_then(|table| query::document(&table, id).cloned())
    }

    /// Documents of `name` in insertion order, optionally filtered.
    pub fn get_documents(
        &self,
        name: CollectionName,
        predicate: Option<DocumentFilter<'_>>,
    ) -> Vec<Document> {
        self.table(name)
            .map(|table| query::documents(&table, predicate))
            .unwrap_or_default()
    }

    /// Case-insensitive substring search over `fields`, or over every string
    /// field when `fields` is `None`. An empty term matches nothing.
    pub fn search_documents(
        &self,
        name: CollectionName,
        term: &str,
        fields: Option<&[&str]>,
    ) -> Vec<Document> {
        self.table(name)
            .map(|table| query::search(&table, term, fields))
            .unwrap_or_default()
    }

    /// Every document of `T`'s collection, decoded into `T`.
    pub fn typed_documents<T: CollectionDocument>(&self) -> Result<Vec<T>> {
        self.get_documents(T::COLLECTION, None)
            .iter()
            .map(schema::decode)
            .collect()
    }

    /// One document of `T`'s collection, decoded into `T`.
    pub fn typed_document<T: CollectionDocument>(&self, id: &DocumentId) -> Result<Option<T>> {
        self.get_document(T::COLLECTION, id)
            .map(|doc| schema::decode(&doc))
            .transpose()
    }

    // --- Notifications ---

    /// Register a store-change watcher.
    pub fn watch(&self, config: WatchConfig) -> WatchHandle {
        self.inner.notifications.watch(config)
    }

    pub fn unwatch(&self, id: WatchId) {
        self.inner.notifications.unwatch(id);
    }

    /// Number of registered watchers, views included.
    pub fn watcher_count(&self) -> usize {
        self.inner.notifications.watcher_count()
    }
}

impl CacheInner {
    fn load_lock(&self, name: CollectionName) -> &tokio::sync::Mutex<()> {
        // Every collection gets a lock at construction.
        &self.load_locks[&name]
    }

    /// Route one event from the listener of `generation`.
    fn on_listen_event(&self, name: CollectionName, generation: u64, event: ListenEvent) {
        match event {
            ListenEvent::Batch(batch) => {
                if self.config.ignore_pending_writes && batch.has_pending_writes {
                    trace!(collection = %name, changes = batch.changes.len(), "ignoring local write echo");
                    return;
                }

                let _write = self.write_lock.lock();
                if !self.registry.is_current(name, generation) {
                    trace!(collection = %name, generation, "ignoring batch from stopped listener");
                    return;
                }

                let outcome = self.store.apply(name, &batch.changes);
                debug!(
                    collection = %name,
                    added = outcome.added,
                    modified = outcome.modified,
                    removed = outcome.removed,
                    suppressed = outcome.suppressed,
                    "applied change batch"
                );

                if outcome.changed() {
                    let len = self.store.table(name).map_or(0, |table| table.len());
                    self.notifications.broadcast_collection_changed(
                        name,
                        self.store.revision(name),
                        len,
                    );
                }
            }

            ListenEvent::Error(message) => {
                let _write = self.write_lock.lock();
                if !self.registry.is_current(name, generation) {
                    return;
                }
                warn!(collection = %name, error = %message, "subscription error");
                self.store.set_error(format!("{name}: {message}"));
                self.notifications
                    .broadcast_subscription_error(name, &message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRepository;
    use crate::types::{ChangeBatch, ChangeEvent};
    use serde_json::json;

    fn topics_only() -> CacheConfig {
        CacheConfig {
            collections: vec![CollectionName::Topics],
            ..Default::default()
        }
    }

    fn setup() -> (MemoryRepository, SyncCache) {
        let repo = MemoryRepository::new();
        repo.seed(
            CollectionName::Topics,
            vec![
                Document::new("t1", json!({"topic": "Health"})),
                Document::new("t2", json!({"topic": "Finance"})),
            ],
        );
        let cache = SyncCache::with_config(Arc::new(repo.clone()), topics_only());
        (repo, cache)
    }

    #[tokio::test]
    async fn test_initialize_loads_and_subscribes() {
        let (repo, cache) = setup();
        cache.initialize().await.unwrap();

        assert!(cache.is_initialized());
        assert_eq!(cache.get_collection(CollectionName::Topics).len(), 2);
        assert!(cache.has_subscription(CollectionName::Topics));
        assert_eq!(repo.active_listeners(CollectionName::Topics), 1);
    }

    #[tokio::test]
    async fn test_default_config_loads_every_collection() {
        let repo = MemoryRepository::new();
        let cache = SyncCache::new(Arc::new(repo.clone()));
        cache.initialize().await.unwrap();

        assert_eq!(cache.loaded_collections(), CollectionName::ALL.to_vec());
        assert_eq!(cache.active_subscriptions(), CollectionName::ALL.len());
    }

    #[tokio::test]
    async fn test_pending_write_echo_is_ignored() {
        let (repo, cache) = setup();
        cache.initialize().await.unwrap();

        repo.emit(
            CollectionName::Topics,
            ChangeBatch::new(vec![ChangeEvent::added(Document::new(
                "t9",
                json!({"topic": "Local"}),
            ))])
            .pending(),
        );

        assert_eq!(cache.get_collection(CollectionName::Topics).len(), 2);
    }

    #[tokio::test]
    async fn test_pending_write_applied_when_configured() {
        let repo = MemoryRepository::new();
        let cache = SyncCache::with_config(
            Arc::new(repo.clone()),
            CacheConfig {
                ignore_pending_writes: false,
                ..topics_only()
            },
        );
        cache.initialize().await.unwrap();

        repo.emit(
            CollectionName::Topics,
            ChangeBatch::new(vec![ChangeEvent::added(Document::new(
                "t9",
                json!({"topic": "Local"}),
            ))])
            .pending(),
        );

        assert_eq!(cache.get_collection(CollectionName::Topics).len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_error_is_recorded_and_listener_kept() {
        let (repo, cache) = setup();
        cache.initialize().await.unwrap();

        repo.emit_error(CollectionName::Topics, "connection reset");

        let status = cache.status();
        assert!(status.initialized);
        assert_eq!(status.error.as_deref(), Some("topics: connection reset"));
        assert_eq!(repo.active_listeners(CollectionName::Topics), 1);

        // Data is still there and still live.
        repo.add(
            CollectionName::Topics,
            Document::new("t3", json!({"topic": "Crypto"})),
        );
        assert_eq!(cache.get_collection(CollectionName::Topics).len(), 3);

        cache.clear_error();
        assert!(cache.status().error.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_failure_fails_load() {
        let (repo, cache) = setup();
        repo.fail_subscribe(CollectionName::Topics, "denied");

        let result = cache.initialize().await;
        assert!(matches!(result, Err(CacheError::InitializationFailed { .. })));
        assert!(!cache.has_subscription(CollectionName::Topics));
        // The fetched table is kept.
        assert!(cache.is_loaded(CollectionName::Topics));
    }

    #[tokio::test]
    async fn test_typed_reads() {
        let (_repo, cache) = setup();
        cache.initialize().await.unwrap();

        let topics: Vec<schema::Topic> = cache.typed_documents().unwrap();
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[1].topic, "Finance");

        let t1 = cache
            .typed_document::<schema::Topic>(&DocumentId::from("t1"))
            .unwrap()
            .unwrap();
        assert_eq!(t1.topic, "Health");
        assert!(cache
            .typed_document::<schema::Topic>(&DocumentId::from("nope"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_dropping_cache_stops_listeners() {
        let (repo, cache) = setup();
        cache.initialize().await.unwrap();
        drop(cache);

        // Dropping the cache drops the registry, which stops the listener.
        assert_eq!(repo.active_listeners(CollectionName::Topics), 0);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: CacheConfig =
            serde_json::from_value(json!({"collections": ["users", "vote_history"]})).unwrap();
        assert_eq!(
            config.collections,
            vec![CollectionName::Users, CollectionName::VoteHistory]
        );
        assert!(config.ignore_pending_writes);
        assert_eq!(config.notification_buffer, 256);
    }
}
