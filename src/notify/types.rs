//! Notification types for store-change watchers.

use crate::types::CollectionName;
use serde::{Deserialize, Serialize};

/// Configuration for a watcher.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Max buffered events before dropping the watcher.
    /// Default: 256
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: WatchFilter,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: WatchFilter::all(),
        }
    }
}

/// Filter criteria for watchers.
#[derive(Clone, Debug, Default)]
pub struct WatchFilter {
    /// Only these collections (None = all collections).
    pub collections: Option<Vec<CollectionName>>,

    /// Include table replacement events.
    pub include_changes: bool,

    /// Include initialize/cleanup events.
    pub include_lifecycle: bool,

    /// Include subscription error events.
    pub include_errors: bool,
}

impl WatchFilter {
    /// Table changes for specific collections, plus lifecycle events.
    pub fn collections(collections: Vec<CollectionName>) -> Self {
        Self {
            collections: Some(collections),
            include_changes: true,
            include_lifecycle: true,
            ..Default::default()
        }
    }

    /// Lifecycle events only.
    pub fn lifecycle() -> Self {
        Self {
            include_lifecycle: true,
            ..Default::default()
        }
    }

    /// Subscription errors only.
    pub fn errors() -> Self {
        Self {
            include_errors: true,
            ..Default::default()
        }
    }

    /// Everything.
    pub fn all() -> Self {
        Self {
            collections: None,
            include_changes: true,
            include_lifecycle: true,
            include_errors: true,
        }
    }

    pub(crate) fn matches_collection(&self, collection: CollectionName) -> bool {
        self.collections
            .as_ref()
            .map_or(true, |names| names.contains(&collection))
    }
}

/// Events emitted to watchers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    // --- Data Events ---
    /// A collection's table reference was replaced.
    CollectionChanged {
        collection: CollectionName,
        /// Revision of the new table.
        revision: u64,
        /// Number of documents in the new table.
        len: usize,
    },

    // --- Lifecycle Events ---
    /// The first full load completed.
    Initialized,

    /// Every table and subscription was dropped.
    Cleared,

    // --- Error Events ---
    /// A push channel reported an error. The listener stays attached.
    SubscriptionError {
        collection: CollectionName,
        message: String,
    },

    /// Watcher was dropped.
    Dropped { reason: DropReason },
}

/// Why a watcher was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unwatched.
    Unwatched,
}

/// Unique identifier for a watcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Handle to receive events for a watcher.
pub struct WatchHandle {
    pub id: WatchId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl WatchHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every event already buffered.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }
}
