//! Interface to the remote document repository.
//!
//! The cache never talks to a transport directly. It consumes a
//! [`RepositoryClient`], which offers a one-shot bulk read and a push
//! subscription per collection.

use crate::error::Result;
use crate::types::{ChangeBatch, CollectionName, Document};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Something delivered to a subscription listener.
#[derive(Clone, Debug)]
pub enum ListenEvent {
    /// An ordered batch of changes.
    Batch(ChangeBatch),
    /// The push channel reported an error. The listener stays attached.
    Error(String),
}

/// Callback invoked for every event on a subscription.
pub type BatchListener = Arc<dyn Fn(ListenEvent) + Send + Sync>;

/// Client for the remote document database.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Read every document currently in `collection`.
    async fn fetch_all(&self, collection: CollectionName) -> Result<Vec<Document>>;

    /// Attach a push listener to `collection`.
    ///
    /// Events for one collection must be delivered in commit order. Stopping
    /// the returned handle detaches the listener; no callbacks fire afterwards.
    fn subscribe(&self, collection: CollectionName, listener: BatchListener) -> Result<StopHandle>;
}

/// Handle that detaches a subscription listener.
///
/// Stopping is idempotent. A handle that is dropped without being stopped
/// stops its listener on drop.
pub struct StopHandle {
    collection: CollectionName,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl StopHandle {
    pub fn new(collection: CollectionName, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            collection,
            stop: Some(Box::new(stop)),
        }
    }

    pub fn collection(&self) -> CollectionName {
        self.collection
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_none()
    }

    /// Detach the listener.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("collection", &self.collection)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
