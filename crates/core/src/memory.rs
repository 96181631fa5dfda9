//! Memory traits: conversation history and long-term semantic memory.
//!
//! History is the short, ordered record of recent turns. Long-term memory
//! holds embedded snippets retrieved by similarity. Both stores live
//! outside this crate; these traits are the boundary.

use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub identity: String,
    pub user_text: String,
    pub assistant_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A long-term memory entry with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermEntry {
    pub id: String,
    pub content: String,
    /// Heuristic importance in `[0.5, 1.0]`
    pub importance: f32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// A long-term entry returned by similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySnippet {
    pub id: String,
    pub content: String,
    pub similarity: f32,
    pub importance: f32,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Storage for conversation interactions.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The `limit` most recent interactions for an identity, newest first.
    async fn recent(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, MemoryError>;

    async fn append(&self, record: InteractionRecord) -> Result<(), MemoryError>;

    /// Remove interactions created before `cutoff`. Returns how many were removed.
    async fn delete_older_than(
        &self,
        identity: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, MemoryError>;

    /// Every interaction for an identity, oldest first.
    async fn all(&self, identity: &str) -> Result<Vec<InteractionRecord>, MemoryError>;
}

/// Embedding-indexed long-term storage.
#[async_trait]
pub trait LongTermStore: Send + Sync {
    async fn insert(&self, entry: LongTermEntry) -> Result<(), MemoryError>;

    /// Entries whose similarity to `embedding` is at least `threshold`,
    /// ranked descending, at most `limit`.
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<MemorySnippet>, MemoryError>;

    async fn count(&self) -> Result<usize, MemoryError>;
}

/// Text → vector embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}
