//! Notification manager for broadcasting store changes.

use crate::types::CollectionName;
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{DropReason, StoreEvent, WatchConfig, WatchHandle, WatchId};

/// Internal watcher state.
struct Watcher {
    config: WatchConfig,
    sender: Sender<StoreEvent>,
}

impl Watcher {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (watcher will be dropped).
    fn try_send(&self, event: StoreEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    fn wants_change(&self, collection: CollectionName) -> bool {
        self.config.filter.include_changes && self.config.filter.matches_collection(collection)
    }

    fn wants_lifecycle(&self) -> bool {
        self.config.filter.include_lifecycle
    }

    fn wants_error(&self, collection: CollectionName) -> bool {
        self.config.filter.include_errors && self.config.filter.matches_collection(collection)
    }
}

/// Manages watchers and broadcasts store events.
pub struct NotificationManager {
    /// Active watchers by ID.
    watchers: RwLock<HashMap<WatchId, Watcher>>,
    /// Counter for generating watcher IDs.
    next_id: AtomicU64,
}

impl NotificationManager {
    /// Create a new notification manager.
    pub fn new() -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a watcher.
    pub fn watch(&self, config: WatchConfig) -> WatchHandle {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.watchers
            .write()
            .insert(id, Watcher { config, sender });

        WatchHandle { id, receiver }
    }

    /// Remove a watcher.
    pub fn unwatch(&self, id: WatchId) {
        let mut watchers = self.watchers.write();
        if let Some(watcher) = watchers.remove(&id) {
            // Best effort
            let _ = watcher.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unwatched,
            });
        }
    }

    /// Get watcher count.
    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }

    // --- Broadcasting ---

    /// Broadcast a table replacement.
    pub fn broadcast_collection_changed(&self, collection: CollectionName, revision: u64, len: usize) {
        let event = StoreEvent::CollectionChanged {
            collection,
            revision,
            len,
        };

        self.broadcast(|watcher| watcher.wants_change(collection), event);
    }

    /// Broadcast completion of the first full load.
    pub fn broadcast_initialized(&self) {
        self.broadcast(Watcher::wants_lifecycle, StoreEvent::Initialized);
    }

    /// Broadcast a full reset.
    pub fn broadcast_cleared(&self) {
        self.broadcast(Watcher::wants_lifecycle, StoreEvent::Cleared);
    }

    /// Broadcast a push-channel error.
    pub fn broadcast_subscription_error(&self, collection: CollectionName, message: &str) {
        let event = StoreEvent::SubscriptionError {
            collection,
            message: message.to_string(),
        };

        self.broadcast(|watcher| watcher.wants_error(collection), event);
    }

    /// Internal broadcast helper. Drops watchers that fail to receive.
    fn broadcast<F>(&self, filter: F, event: StoreEvent)
    where
        F: Fn(&Watcher) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let watchers = self.watchers.read();
            for (id, watcher) in watchers.iter() {
                if filter(watcher) && !watcher.try_send(event.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut watchers = self.watchers.write();
            for id in to_remove {
                if let Some(watcher) = watchers.remove(&id) {
                    // Might fail, that's ok
                    let _ = watcher.sender.try_send(StoreEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                    tracing::debug!(watcher = id.0, "dropped slow or closed watcher");
                }
            }
        }
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}
