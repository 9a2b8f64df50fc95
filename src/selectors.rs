//! Render-stable views over the cache.
//!
//! A [`View`] derives a value from one collection's table and memoizes it on
//! the pair (initialized flag, table reference). Because tables are only
//! replaced on real change, a view hands out the same `Arc` until something
//! it depends on actually changed. Views are driven by store notifications,
//! not polling: [`View::try_next`] and [`View::next_timeout`] only yield when
//! a notification arrived and the derived value changed identity.
//!
//! Before the cache is initialized every view yields its neutral value
//! (empty list, no document).

use crate::cache::SyncCache;
use crate::notify::{StoreEvent, WatchConfig, WatchFilter, WatchHandle};
use crate::store::{CollectionTable, TableRef};
use crate::types::{CollectionName, Document, DocumentId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a memoized value was computed from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoKey {
    pub initialized: bool,
    pub table: TableRef,
}

/// Single-slot memo.
///
/// Recomputes only when the key changes. A recomputed value equal to the
/// cached one keeps the cached `Arc`, so identity survives unrelated changes
/// to the underlying table.
pub struct Memo<V> {
    slot: Mutex<Option<(MemoKey, Arc<V>)>>,
}

impl<V: PartialEq> Memo<V> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self, key: MemoKey, compute: impl FnOnce(&MemoKey) -> V) -> Arc<V> {
        let mut slot = self.slot.lock();
        if let Some((cached_key, value)) = slot.as_ref() {
            if *cached_key == key {
                return Arc::clone(value);
            }
        }

        let fresh = compute(&key);
        let value = match slot.take() {
            Some((_, previous)) if *previous == fresh => previous,
            _ => Arc::new(fresh),
        };
        *slot = Some((key, Arc::clone(&value)));
        value
    }
}

impl<V: PartialEq> Default for Memo<V> {
    fn default() -> Self {
        Self::new()
    }
}

type Derive<V> = Box<dyn Fn(Option<&CollectionTable>) -> V + Send + Sync>;

/// Predicate shared by a filtered view.
pub type SharedFilter = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// A memoized, notification-driven view of one collection.
pub struct View<V> {
    cache: SyncCache,
    collection: CollectionName,
    derive: Derive<V>,
    memo: Memo<V>,
    watch: Mutex<WatchHandle>,
    /// Last value handed to the consumer.
    last: Mutex<Option<Arc<V>>>,
}

/// All documents of a collection.
pub type CollectionView = View<Vec<Document>>;

/// One document by id.
pub type DocumentView = View<Option<Document>>;

/// Documents of a collection that satisfy a predicate.
pub type FilteredView = View<Vec<Document>>;

impl<V: PartialEq + Default> View<V> {
    fn new(cache: &SyncCache, collection: CollectionName, derive: Derive<V>) -> Self {
        let watch = cache.watch(Self::watch_config(cache, collection));
        Self {
            cache: cache.clone(),
            collection,
            derive,
            memo: Memo::new(),
            watch: Mutex::new(watch),
            last: Mutex::new(None),
        }
    }

    fn watch_config(cache: &SyncCache, collection: CollectionName) -> WatchConfig {
        WatchConfig {
            buffer_size: cache.config().notification_buffer,
            filter: WatchFilter::collections(vec![collection]),
        }
    }

    pub fn collection(&self) -> CollectionName {
        self.collection
    }

    /// The current value.
    pub fn current(&self) -> Arc<V> {
        let initialized = self.cache.is_initialized();
        let key = MemoKey {
            initialized,
            table: if initialized {
                TableRef::new(self.cache.table(self.collection))
            } else {
                TableRef::default()
            },
        };

        let value = self.memo.get(key, |key| {
            if key.initialized {
                (self.derive)(key.table.table())
            } else {
                V::default()
            }
        });
        *self.last.lock() = Some(Arc::clone(&value));
        value
    }

    /// The new value, if a notification arrived and the value changed since
    /// the consumer last saw it. Never blocks.
    pub fn try_next(&self) -> Option<Arc<V>> {
        let events = self.watch.lock().drain();
        if events.is_empty() {
            return None;
        }
        self.handle_events(&events);
        self.changed()
    }

    /// Wait up to `timeout` for the value to change.
    pub fn next_timeout(&self, timeout: Duration) -> Option<Arc<V>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Block outside the handle lock.
            let receiver = self.watch.lock().receiver.clone();
            let mut events = match receiver.recv_timeout(remaining) {
                Ok(event) => vec![event],
                Err(_) => return None,
            };
            events.extend(self.watch.lock().drain());
            self.handle_events(&events);

            if let Some(value) = self.changed() {
                return Some(value);
            }
        }
    }

    fn handle_events(&self, events: &[StoreEvent]) {
        // A dropped watcher gets replaced so the view keeps receiving.
        if events
            .iter()
            .any(|event| matches!(event, StoreEvent::Dropped { .. }))
        {
            let mut watch = self.watch.lock();
            *watch = self
                .cache
                .watch(Self::watch_config(&self.cache, self.collection));
        }
    }

    fn changed(&self) -> Option<Arc<V>> {
        let previous = self.last.lock().clone();
        let value = self.current();
        match previous {
            Some(previous) if Arc::ptr_eq(&previous, &value) => None,
            _ => Some(value),
        }
    }
}

impl<V> Drop for View<V> {
    fn drop(&mut self) {
        self.cache.unwatch(self.watch.get_mut().id);
    }
}

impl SyncCache {
    /// View of every document of `name`, in insertion order.
    pub fn use_collection(&self, name: CollectionName) -> CollectionView {
        View::new(
            self,
            name,
            Box::new(|table: Option<&CollectionTable>| -> Vec<Document> {
                table
                    .map(|table| table.values().cloned().collect())
                    .unwrap_or_default()
            }),
        )
    }

    /// View of one document of `name`.
    pub fn use_document(&self, name: CollectionName, id: impl Into<DocumentId>) -> DocumentView {
        let id = id.into();
        View::new(
            self,
            name,
            Box::new(move |table: Option<&CollectionTable>| -> Option<Document> {
                table.and_then(|table| table.get(&id).cloned())
            }),
        )
    }

    /// View of the documents of `name` that satisfy `predicate`.
    pub fn use_filtered_documents(
        &self,
        name: CollectionName,
        predicate: impl Fn(&Document) -> bool + Send + Sync + 'static,
    ) -> FilteredView {
        let predicate: SharedFilter = Arc::new(predicate);
        View::new(
            self,
            name,
            Box::new(move |table: Option<&CollectionTable>| -> Vec<Document> {
                table
                    .map(|table| {
                        table
                            .values()
                            .filter(|doc| predicate(*doc))
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::memory::MemoryRepository;
    use serde_json::json;

    fn setup() -> (MemoryRepository, SyncCache) {
        let repo = MemoryRepository::new();
        repo.seed(
            CollectionName::Topics,
            vec![
                Document::new("t1", json!({"topic": "Health"})),
                Document::new("t2", json!({"topic": "Finance"})),
            ],
        );
        let cache = SyncCache::with_config(
            Arc::new(repo.clone()),
            CacheConfig {
                collections: vec![CollectionName::Topics, CollectionName::Users],
                ..Default::default()
            },
        );
        (repo, cache)
    }

    #[test]
    fn test_memo_reuses_value_for_same_key() {
        let memo: Memo<Vec<u32>> = Memo::new();
        let key = MemoKey::default();

        let first = memo.get(key.clone(), |_| vec![1, 2]);
        let second = memo.get(key, |_| panic!("must not recompute"));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_memo_keeps_identity_for_equal_result() {
        let memo: Memo<Vec<u32>> = Memo::new();
        let table_a: CollectionTable = Arc::default();
        let table_b: CollectionTable = Arc::default();

        let first = memo.get(
            MemoKey {
                initialized: true,
                table: TableRef::new(Some(table_a)),
            },
            |_| vec![1],
        );
        let second = memo.get(
            MemoKey {
                initialized: true,
                table: TableRef::new(Some(table_b)),
            },
            |_| vec![1],
        );
        let third = memo.get(MemoKey::default(), |_| vec![2]);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&second, &third));
    }

    #[tokio::test]
    async fn test_views_are_empty_before_initialize() {
        let (_repo, cache) = setup();
        // Loaded by refresh, but the cache is not initialized yet.
        cache.refresh_collection(CollectionName::Topics).await.unwrap();

        assert!(cache.use_collection(CollectionName::Topics).current().is_empty());
        assert!(cache
            .use_document(CollectionName::Topics, "t1")
            .current()
            .is_none());
    }

    #[tokio::test]
    async fn test_collection_view_stable_across_noop_push() {
        let (repo, cache) = setup();
        cache.initialize().await.unwrap();
        let view = cache.use_collection(CollectionName::Topics);

        let before = view.current();
        assert_eq!(before.len(), 2);

        repo.modify(
            CollectionName::Topics,
            Document::new("t1", json!({"topic": "Health"})),
        );
        assert!(view.try_next().is_none());
        assert!(Arc::ptr_eq(&before, &view.current()));

        repo.add(
            CollectionName::Topics,
            Document::new("t3", json!({"topic": "Crypto"})),
        );
        let after = view.try_next().unwrap();
        assert_eq!(after.len(), 3);
        assert!(view.try_next().is_none());
    }

    #[tokio::test]
    async fn test_document_view_ignores_other_documents() {
        let (repo, cache) = setup();
        cache.initialize().await.unwrap();
        let view = cache.use_document(CollectionName::Topics, "t1");
        let before = view.current();

        repo.modify(
            CollectionName::Topics,
            Document::new("t2", json!({"topic": "Markets"})),
        );
        assert!(view.try_next().is_none());
        assert!(Arc::ptr_eq(&before, &view.current()));

        repo.modify(
            CollectionName::Topics,
            Document::new("t1", json!({"topic": "Wellness"})),
        );
        let after = view.try_next().unwrap();
        assert_eq!(
            (*after).as_ref().and_then(|d| d.get_str("topic")),
            Some("Wellness")
        );
    }

    #[tokio::test]
    async fn test_filtered_view() {
        let (repo, cache) = setup();
        cache.initialize().await.unwrap();
        let view = cache.use_filtered_documents(CollectionName::Topics, |doc| {
            doc.get_str("topic").is_some_and(|t| t.starts_with('C'))
        });
        assert!(view.current().is_empty());

        repo.add(
            CollectionName::Topics,
            Document::new("t3", json!({"topic": "Crypto"})),
        );
        let next = view.try_next().unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].id.as_str(), "t3");
    }

    #[tokio::test]
    async fn test_view_sees_initialize_and_cleanup() {
        let (_repo, cache) = setup();
        let view = cache.use_collection(CollectionName::Topics);
        assert!(view.current().is_empty());

        cache.initialize().await.unwrap();
        assert_eq!(view.try_next().unwrap().len(), 2);

        cache.cleanup();
        assert!(view.try_next().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_next_timeout_without_change() {
        let (_repo, cache) = setup();
        cache.initialize().await.unwrap();
        let view = cache.use_collection(CollectionName::Users);
        view.current();

        assert!(view.next_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_try_next_not_blocked_by_waiting_thread() {
        let (_repo, cache) = setup();
        let view = cache.use_collection(CollectionName::Topics);
        view.current();

        std::thread::scope(|scope| {
            scope.spawn(|| view.next_timeout(Duration::from_millis(500)));
            std::thread::sleep(Duration::from_millis(50));

            let start = Instant::now();
            assert!(view.try_next().is_none());
            assert!(start.elapsed() < Duration::from_millis(250));
        });
    }

    #[test]
    fn test_dropping_view_unwatches() {
        let (_repo, cache) = setup();
        let view = cache.use_collection(CollectionName::Topics);
        let other = cache.use_document(CollectionName::Topics, "t1");
        assert_eq!(cache.watcher_count(), 2);

        drop(view);
        assert_eq!(cache.watcher_count(), 1);
        drop(other);
        assert_eq!(cache.watcher_count(), 0);
    }
}
