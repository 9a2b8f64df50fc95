//! # Mirror Store
//!
//! A client-side normalized cache that mirrors named collections of a remote
//! document database into local tables and keeps them live through push
//! subscriptions.
//!
//! ## Core Concepts
//!
//! - **Collections**: A closed set of names, each bound to a document shape
//! - **Tables**: Immutable id -> document maps, replaced only on real change
//! - **Listeners**: Exactly one push subscription per loaded collection
//! - **Views**: Memoized derived values that keep their identity across no-op pushes
//!
//! ## Example
//!
//! ```ignore
//! use mirrorstore::{CollectionName, MemoryRepository, SyncCache};
//!
//! let repo = MemoryRepository::new();
//! let cache = SyncCache::new(Arc::new(repo.clone()));
//!
//! // Load every collection and attach listeners
//! cache.initialize().await?;
//!
//! // Read
//! let janes = cache.search_documents(CollectionName::Users, "jane", Some(&["username"]));
//!
//! // Subscribe to a render-stable view
//! let threads = cache.use_collection(CollectionName::Threads);
//! let current = threads.current();
//!
//! // Sign-out
//! cache.cleanup();
//! ```

pub mod cache;
pub mod changes;
pub mod client;
pub mod error;
pub mod memory;
pub mod notify;
pub mod query;
pub mod schema;
pub mod selectors;
pub mod session;
pub mod store;
pub mod types;

// Re-exports
pub use cache::{CacheConfig, SyncCache};
pub use changes::{apply_changes, ApplyOutcome};
pub use client::{BatchListener, ListenEvent, RepositoryClient, StopHandle};
pub use error::{CacheError, Result};
pub use memory::MemoryRepository;
pub use notify::{
    DropReason, NotificationManager, StoreEvent, WatchConfig, WatchFilter, WatchHandle, WatchId,
};
pub use query::DocumentFilter;
pub use schema::CollectionDocument;
pub use selectors::{CollectionView, DocumentView, FilteredView, Memo, MemoKey, View};
pub use session::SessionEvent;
pub use store::{CollectionTable, NormalizedStore, SubscriptionRegistry, TableRef};
pub use types::*;
