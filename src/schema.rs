//! Typed document shapes, one per collection.
//!
//! Each shape implements [`CollectionDocument`], which binds it to exactly one
//! [`CollectionName`] at compile time. Typed reads go through
//! [`decode`], so a document can only be decoded into the shape of the
//! collection it was read from.

use crate::error::Result;
use crate::types::{CollectionName, Document};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A document shape bound to a single collection.
pub trait CollectionDocument: DeserializeOwned {
    const COLLECTION: CollectionName;
}

/// Decode a cached document into its collection's shape.
pub fn decode<T: CollectionDocument>(document: &Document) -> Result<T> {
    Ok(serde_json::from_value(document.to_json())?)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub points: i64,
}

impl CollectionDocument for User {
    const COLLECTION: CollectionName = CollectionName::Users;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl CollectionDocument for Thread {
    const COLLECTION: CollectionName = CollectionName::Threads;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub topic: String,
}

impl CollectionDocument for Topic {
    const COLLECTION: CollectionName = CollectionName::Topics;
}

/// Direction of a recorded vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    pub user_id: String,
    pub thread_id: String,
    pub direction: VoteDirection,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl CollectionDocument for Vote {
    const COLLECTION: CollectionName = CollectionName::VoteHistory;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: String,
    pub user_id: String,
    pub score: i64,
    #[serde(default)]
    pub rank: Option<u32>,
}

impl CollectionDocument for LeaderboardEntry {
    const COLLECTION: CollectionName = CollectionName::Leaderboard;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub thread_id: String,
    pub author_id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl CollectionDocument for Comment {
    const COLLECTION: CollectionName = CollectionName::Comments;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    pub from_user_id: String,
    pub to_user_id: String,
    #[serde(default)]
    pub accepted: bool,
}

impl CollectionDocument for Connection {
    const COLLECTION: CollectionName = CollectionName::Connections;
}
