//! Core types for the collection cache.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

/// A collection of the remote database that the cache knows how to mirror.
///
/// The set is closed: no collection outside this enum can be loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionName {
    Users,
    Threads,
    Topics,
    VoteHistory,
    Leaderboard,
    Comments,
    Connections,
}

impl CollectionName {
    /// Every known collection, in load order.
    pub const ALL: [CollectionName; 7] = [
        CollectionName::Users,
        CollectionName::Threads,
        CollectionName::Topics,
        CollectionName::VoteHistory,
        CollectionName::Leaderboard,
        CollectionName::Comments,
        CollectionName::Connections,
    ];

    /// Name of the collection on the remote side.
    pub fn as_str(self) -> &'static str {
        match self {
            CollectionName::Users => "users",
            CollectionName::Threads => "threads",
            CollectionName::Topics => "topics",
            CollectionName::VoteHistory => "vote_history",
            CollectionName::Leaderboard => "leaderboard",
            CollectionName::Comments => "comments",
            CollectionName::Connections => "connections",
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionName {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectionName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| CacheError::UnknownCollection(s.to_string()))
    }
}

/// Identifier assigned to a document by the remote database.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

/// A single document as delivered by the remote database.
///
/// Equality is structural over the id and every field, which is what the
/// change applier relies on to suppress echoed writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Collection-specific fields (the id is not repeated here).
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create a document from an id and a JSON value.
    ///
    /// Non-object values yield a document with no fields. An `id` key inside
    /// the value is dropped in favor of the explicit id.
    pub fn new(id: impl Into<DocumentId>, value: Value) -> Self {
        let mut fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        fields.remove("id");
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Build a document from a JSON object that carries its own `id` key.
    pub fn from_json(value: Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?.to_string();
        Some(Self::new(id, value))
    }

    /// Look up a field by name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of a field, if it is a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// The document as a single JSON object, id included.
    pub fn to_json(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert("id".to_string(), Value::String(self.id.0.clone()));
        Value::Object(map)
    }
}

/// A single change reported by a push subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Added { document: Document },
    Modified { document: Document },
    Removed { id: DocumentId },
}

impl ChangeEvent {
    pub fn added(document: Document) -> Self {
        ChangeEvent::Added { document }
    }

    pub fn modified(document: Document) -> Self {
        ChangeEvent::Modified { document }
    }

    pub fn removed(id: impl Into<DocumentId>) -> Self {
        ChangeEvent::Removed { id: id.into() }
    }

    /// Id of the affected document.
    pub fn id(&self) -> &DocumentId {
        match self {
            ChangeEvent::Added { document } | ChangeEvent::Modified { document } => &document.id,
            ChangeEvent::Removed { id } => id,
        }
    }
}

/// An ordered batch of changes for one collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Changes in remote commit order.
    pub changes: Vec<ChangeEvent>,

    /// Set when the batch echoes a local write that has not been
    /// acknowledged yet.
    #[serde(default)]
    pub has_pending_writes: bool,
}

impl ChangeBatch {
    pub fn new(changes: Vec<ChangeEvent>) -> Self {
        Self {
            changes,
            has_pending_writes: false,
        }
    }

    /// Mark the batch as a local-write echo.
    pub fn pending(mut self) -> Self {
        self.has_pending_writes = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Global lifecycle flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LifecycleStatus {
    /// A load sequence is in progress.
    pub loading: bool,
    /// The first full load sequence completed successfully.
    pub initialized: bool,
    /// Last error message, if any.
    pub error: Option<String>,
}
