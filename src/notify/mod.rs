//! Store-change notifications.
//!
//! Watchers are told when something observable happens to the cache:
//! - A collection's table reference was replaced
//! - The first full load finished, or the cache was cleared
//! - A push channel reported an error
//!
//! Watchers support:
//! - Filtering by collection and event kind
//! - Bounded buffers with slow-watcher dropping
//!
//! # Example
//!
//! ```ignore
//! let handle = cache.watch(WatchConfig {
//!     filter: WatchFilter::collections(vec![CollectionName::Threads]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::CollectionChanged { revision, .. }) => println!("threads @ {revision}"),
//!         Ok(StoreEvent::Cleared) => println!("signed out"),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::NotificationManager;
pub use types::{DropReason, StoreEvent, WatchConfig, WatchFilter, WatchHandle, WatchId};
