//! Error types for the collection cache.

use crate::types::CollectionName;
use thiserror::Error;

/// Main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Fetch failed for {collection}: {message}")]
    Fetch {
        collection: CollectionName,
        message: String,
    },

    #[error("Subscribe failed for {collection}: {message}")]
    Subscribe {
        collection: CollectionName,
        message: String,
    },

    #[error("Initialization failed for {} collection(s): {}", .failures.len(), describe(.failures))]
    InitializationFailed {
        failures: Vec<(CollectionName, String)>,
    },

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Load of {0} cancelled by cleanup")]
    Cancelled(CollectionName),

    #[error("Initialization cancelled by cleanup")]
    InitializationCancelled,

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

fn describe(failures: &[(CollectionName, String)]) -> String {
    failures
        .iter()
        .map(|(name, message)| format!("{name}: {message}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Deserialization(e.to_string())
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
