//! In-memory stores, useful for tests and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use switchboard_core::error::MemoryError;
use switchboard_core::memory::{
    HistoryStore, InteractionRecord, LongTermEntry, LongTermStore, MemorySnippet,
};
use tokio::sync::RwLock;

use crate::vector::rank_by_similarity;

/// Interaction history kept per identity in insertion order.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    records: Arc<RwLock<HashMap<String, Vec<InteractionRecord>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of identities with at least one stored interaction.
    pub async fn identity_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn recent(
        &self,
        identity: &str,
        limit: usize,
    ) -> Result<Vec<InteractionRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(records
            .get(identity)
            .map(|rows| rows.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn append(&self, record: InteractionRecord) -> Result<(), MemoryError> {
        self.records
            .write()
            .await
            .entry(record.identity.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn delete_older_than(
        &self,
        identity: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, MemoryError> {
        let mut records = self.records.write().await;
        let Some(rows) = records.get_mut(identity) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| r.created_at >= cutoff);
        let removed = before - rows.len();
        if rows.is_empty() {
            records.remove(identity);
        }
        Ok(removed)
    }

    async fn all(&self, identity: &str) -> Result<Vec<InteractionRecord>, MemoryError> {
        Ok(self.records.read().await.get(identity).cloned().unwrap_or_default())
    }
}

/// Long-term entries scanned linearly on search.
#[derive(Default)]
pub struct InMemoryLongTermStore {
    entries: Arc<RwLock<Vec<LongTermEntry>>>,
}

impl InMemoryLongTermStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LongTermStore for InMemoryLongTermStore {
    async fn insert(&self, entry: LongTermEntry) -> Result<(), MemoryError> {
        if entry.embedding.is_empty() {
            return Err(MemoryError::Storage(format!("entry {} has no embedding", entry.id)));
        }
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<MemorySnippet>, MemoryError> {
        let entries = self.entries.read().await;
        Ok(rank_by_similarity(&entries, embedding, limit, threshold))
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        Ok(self.entries.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(identity: &str, user: &str, at: DateTime<Utc>) -> InteractionRecord {
        InteractionRecord {
            identity: identity.into(),
            user_text: user.into(),
            assistant_text: format!("re: {user}"),
            created_at: at,
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_bounded() {
        let store = InMemoryHistoryStore::new();
        let now = Utc::now();
        for i in 0..5 {
            let at = now + Duration::seconds(i);
            store.append(record("+250780000001", &format!("m{i}"), at)).await.unwrap();

        }
        let recent = store.recent("+250780000001", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_text, "m4");
        assert_eq!(recent[1].user_text, "m3");
        assert!(store.recent("+250780000999", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_older_than_cutoff() {
        let store = InMemoryHistoryStore::new();
        let now = Utc::now();
        store.append(record("a", "old", now - Duration::days(40))).await.unwrap();
        store.append(record("a", "new", now)).await.unwrap();
        store.append(record("b", "other", now - Duration::days(40))).await.unwrap();

        let removed = store.delete_older_than("a", now - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        let all = store.all("a").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].user_text, "new");
        assert_eq!(store.all("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn long_term_rejects_unembedded_entries() {
        let store = InMemoryLongTermStore::new();
        let entry = LongTermEntry {
            id: "x".into(),
            content: "no vector".into(),
            importance: 0.5,
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
            embedding: vec![],
        };
        assert!(store.insert(entry).await.is_err());
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
