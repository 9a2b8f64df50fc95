//! Read-only queries over a collection table.
//!
//! These never mutate anything; [`SyncCache`](crate::SyncCache) calls them on
//! the table it currently holds, or on an empty table when the collection has
//! not been loaded.

use crate::types::{Document, DocumentId};
use indexmap::IndexMap;
use serde_json::Value;

type Table = IndexMap<DocumentId, Document>;

/// Predicate used to filter documents.
pub type DocumentFilter<'a> = &'a dyn Fn(&Document) -> bool;

/// Look up a single document.
pub fn document<'a>(table: &'a Table, id: &DocumentId) -> Option<&'a Document> {
    table.get(id)
}

/// All documents in insertion order, optionally filtered.
pub fn documents(table: &Table, predicate: Option<DocumentFilter<'_>>) -> Vec<Document> {
    match predicate {
        Some(predicate) => table.values().filter(|doc| predicate(*doc)).cloned().collect(),
        None => table.values().cloned().collect(),
    }
}

/// Case-insensitive substring search.
///
/// With `fields`, a document matches when at least one of the named fields
/// holds a string containing `term`. Without, every string-valued field is
/// checked. An empty term matches nothing.
pub fn search(table: &Table, term: &str, fields: Option<&[&str]>) -> Vec<Document> {
    if term.is_empty() {
        return Vec::new();
    }
    let needle = term.to_lowercase();

    table
        .values()
        .filter(|doc| matches_term(doc, &needle, fields))
        .cloned()
        .collect()
}

fn matches_term(doc: &Document, needle: &str, fields: Option<&[&str]>) -> bool {
    let contains = |value: &Value| {
        value
            .as_str()
            .is_some_and(|s| s.to_lowercase().contains(needle))
    };

    match fields {
        Some(fields) => fields
            .iter()
            .filter_map(|field| doc.get(field))
            .any(contains),
        None => doc.fields.values().any(contains),
    }
}
