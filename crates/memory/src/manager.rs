//! Memory Manager: cached recent history plus long-term semantic memory.
//!
//! History reads go through a `moka` TTL cache with one entry per identity,
//! holding every window size loaded since that identity's last write.
//! A write (`save_interaction`, `clear_old_history`) drops the entry once
//! the store has accepted it, so a read that starts after the write returns
//! sees it. A read racing the write fills the detached entry, which no later
//! read can reach.

use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use switchboard_config::MemoryConfig;
use switchboard_core::error::MemoryError;
use switchboard_core::memory::{
    Embedder, HistoryStore, InteractionRecord, LongTermEntry, LongTermStore, MemorySnippet,
};
use switchboard_core::message::{HistoryTurn, Message, TurnRole};
use switchboard_core::provider::{Provider, ProviderRequest};
use tracing::{debug, info, warn};

use crate::embedder::HashEmbedder;
use crate::in_memory::{InMemoryHistoryStore, InMemoryLongTermStore};

const IMPORTANCE_KEYWORDS: [&str; 10] = [
    "important", "remember", "note", "critical", "urgent",
    "booking", "payment", "transfer", "confirmed", "scheduled",
];

/// Turns rendered by [`MemoryManager::build_context_string`].
const CONTEXT_STRING_TURNS: usize = 10;

/// Cached windows for one identity, keyed by turn limit.
#[derive(Default)]
struct HistoryWindows {
    by_limit: Mutex<HashMap<usize, Arc<Vec<HistoryTurn>>>>,
}

impl HistoryWindows {
    fn get(&self, limit: usize) -> Option<Arc<Vec<HistoryTurn>>> {
        self.by_limit.lock().unwrap_or_else(|e| e.into_inner()).get(&limit).cloned()
    }

    fn insert(&self, limit: usize, turns: Arc<Vec<HistoryTurn>>) {
        self.by_limit.lock().unwrap_or_else(|e| e.into_inner()).insert(limit, turns);
    }
}

/// Heuristic importance: 0.5 plus 0.1 per keyword present, capped at 1.0.
pub fn importance_score(text: &str) -> f32 {
    let lower = text.to_lowercase();
    let matched = IMPORTANCE_KEYWORDS.iter().filter(|k| lower.contains(*k)).count();
    (0.5 + 0.1 * matched as f32).min(1.0)
}

/// Aggregate facts about one identity's stored history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub total_interactions: usize,
    pub first_interaction: Option<DateTime<Utc>>,
    pub last_interaction: Option<DateTime<Utc>>,
    /// De-duplicated values of each record's `key_facts` metadata, first seen first
    pub key_facts: Vec<String>,
}

/// Facts, preferences and decisions pulled out of an exchange by the LLM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportantInfo {
    pub facts: Vec<String>,
    pub preferences: Vec<String>,
    pub decisions: Vec<String>,
}

impl ImportantInfo {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.preferences.is_empty() && self.decisions.is_empty()
    }

    /// Lenient parse of the extractor's answer. Code fences are ignored and
    /// a field that is missing or not a list of strings comes back empty.
    fn parse(answer: &str) -> Option<Self> {
        let body = answer
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let list = |field: &str| -> Vec<String> {
            value
                .get(field)
                .and_then(|v| v.as_array())
                .map(|items| items.iter().filter_map(|i| i.as_str()).map(str::to_string).collect())
                .unwrap_or_default()
        };
        Some(Self {
            facts: list("facts"),
            preferences: list("preferences"),
            decisions: list("decisions"),
        })
    }
}

const EXTRACTION_PROMPT: &str = "Analyze this conversation and extract:\n\
1. Important facts (specific information about the user or their situation)\n\
2. User preferences (what they like, dislike, or prefer)\n\
3. Decisions made (conclusions or actions agreed upon)\n\n\
Return JSON only: {\"facts\": [], \"preferences\": [], \"decisions\": []}";

pub struct MemoryManager {
    history: Arc<dyn HistoryStore>,
    long_term: Arc<dyn LongTermStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Option<(Arc<dyn Provider>, String)>,
    cache: Option<Cache<String, Arc<HistoryWindows>>>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        long_term: Arc<dyn LongTermStore>,
        embedder: Arc<dyn Embedder>,
        config: &MemoryConfig,
    ) -> Self {
        let cache = config.cache_enabled.then(|| {
            Cache::builder()
                .max_capacity(config.cache_max_entries)
                .time_to_live(std::time::Duration::from_secs(config.cache_ttl_secs))
                .build()
        });

        Self {
            history,
            long_term,
            embedder,
            summarizer: None,
            cache,
            config: config.clone(),
        }
    }

    /// Process-local stores with the offline hashing embedder.
    pub fn in_memory(config: &MemoryConfig) -> Self {
        Self::new(
            Arc::new(InMemoryHistoryStore::new()),
            Arc::new(InMemoryLongTermStore::new()),
            Arc::new(HashEmbedder::default()),
            config,
        )
    }

    /// Use an LLM to produce conversation summaries.
    pub fn with_summarizer(
        mut self,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        self.summarizer = Some((provider, model.into()));
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    // ── History ───────────────────────────────────────────────────────────

    /// The most recent `limit` turns for `identity`, oldest to newest.
    ///
    /// Each stored interaction contributes a user turn and, when non-empty,
    /// an assistant turn. A store failure is logged and yields an empty
    /// history, which is not cached.
    pub async fn get_history(&self, identity: &str, limit: usize) -> Vec<HistoryTurn> {
        if limit == 0 {
            return Vec::new();
        }

        let windows = match &self.cache {
            Some(cache) => {
                Some(cache.get_with(identity.to_string(), async { Arc::default() }).await)
            }
            None => None,
        };
        if let Some(turns) = windows.as_ref().and_then(|w| w.get(limit)) {
            debug!(
                event = "MEMORY_CACHE_HIT",
                limit,
                turns = turns.len(),
                "History served from cache"
            );
            return turns.as_ref().clone();
        }

        let records = match self.history.recent(identity, limit.div_ceil(2)).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, limit, "History read failed, continuing without history");
                return Vec::new();
            }
        };

        let mut turns: Vec<HistoryTurn> = records
            .iter()
            .rev()
            .flat_map(|r| {
                let user = HistoryTurn::user(r.user_text.clone(), r.created_at);
                let assistant = (!r.assistant_text.is_empty())
                    .then(|| HistoryTurn::assistant(r.assistant_text.clone(), r.created_at));
                std::iter::once(user).chain(assistant)
            })
            .collect();

        if turns.len() > limit {
            turns.drain(..turns.len() - limit);
        }

        if let Some(windows) = windows {
            windows.insert(limit, Arc::new(turns.clone()));
            debug!(
                event = "MEMORY_CACHE_MISS",
                limit,
                turns = turns.len(),
                "History loaded from store"
            );
        }

        turns
    }

    /// Persist one exchange and invalidate the identity's cached history.
    pub async fn save_interaction(
        &self,
        identity: &str,
        user_text: &str,
        assistant_text: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), MemoryError> {
        self.history
            .append(InteractionRecord {
                identity: identity.to_string(),
                user_text: user_text.to_string(),
                assistant_text: assistant_text.to_string(),
                created_at: Utc::now(),
                metadata,
            })
            .await?;
        self.invalidate(identity).await;
        Ok(())
    }

    /// Delete interactions older than `older_than_days`. Returns how many were removed.
    pub async fn clear_old_history(
        &self,
        identity: &str,
        older_than_days: i64,
    ) -> Result<usize, MemoryError> {
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let removed = self.history.delete_older_than(identity, cutoff).await?;
        self.invalidate(identity).await;
        info!(removed, older_than_days, "Old history cleared");
        Ok(removed)
    }

    async fn invalidate(&self, identity: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate(identity).await;
        }
    }

    #[cfg(test)]
    async fn cached_identities(&self) -> u64 {
        let Some(cache) = &self.cache else { return 0 };
        cache.run_pending_tasks().await;
        cache.entry_count()
    }

    /// LLM-generated summary of the last `summary_turns` interactions.
    ///
    /// Empty when there is no history, no summarizer, or the call fails.
    pub async fn summarize(&self, identity: &str) -> String {
        let Some((provider, model)) = &self.summarizer else {
            return String::new();
        };

        let records = match self.history.recent(identity, self.config.summary_turns).await {
            Ok(r) if !r.is_empty() => r,
            Ok(_) => return String::new(),
            Err(e) => {
                warn!(error = %e, "History read failed during summarization");
                return String::new();
            }
        };

        let transcript: String = records
            .iter()
            .rev()
            .map(|r| format!("User: {}\nAssistant: {}\n", r.user_text, r.assistant_text))
            .collect();

        let request = ProviderRequest::new(
            model.clone(),
            vec![
                Message::system(
                    "Summarize this conversation in 2-3 sentences. Keep names, dates, amounts and open requests.",
                ),
                Message::user(transcript),
            ],
        )
        .with_temperature(0.3)
        .with_max_tokens(300);

        match provider.complete(request).await {
            Ok(resp) => resp.message.content.trim().to_string(),
            Err(e) => {
                warn!(error = %e, "Conversation summarization failed");
                String::new()
            }
        }
    }

    /// Ask the summarizer model for facts, preferences and decisions in `turns`.
    ///
    /// Empty when there are no turns, no summarizer, the call fails or the
    /// answer is not JSON.
    pub async fn extract_important_info(&self, turns: &[HistoryTurn]) -> ImportantInfo {
        let Some((provider, model)) = &self.summarizer else {
            return ImportantInfo::default();
        };
        if turns.is_empty() {
            return ImportantInfo::default();
        }

        let transcript: String = turns
            .iter()
            .map(|t| {
                let label = match t.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                };
                format!("{label}: {}\n", t.content)
            })
            .collect();

        let request = ProviderRequest::new(
            model.clone(),
            vec![
                Message::system(
                    "You are an information extraction assistant. Extract key information accurately.",
                ),

                Message::user(format!("{EXTRACTION_PROMPT}\n\nConversation:\n{transcript}")),
            ],
        )
        .with_temperature(0.3)
        .with_max_tokens(500);

        let answer = match provider.complete(request).await {
            Ok(resp) => resp.message.content,
            Err(e) => {
                warn!(error = %e, "Key fact extraction failed");
                return ImportantInfo::default();
            }
        };

        match ImportantInfo::parse(&answer) {
            Some(info) => {
                debug!(
                    facts = info.facts.len(),
                    preferences = info.preferences.len(),
                    decisions = info.decisions.len(),
                    "Key facts extracted"
                );
                info
            }
            None => {
                warn!(event = "KEY_FACTS_UNPARSEABLE", "Extractor answer was not JSON");
                ImportantInfo::default()
            }
        }
    }

    /// Counts, time span and key facts over an identity's full history.
    pub async fn conversation_summary(
        &self,
        identity: &str,
    ) -> Result<ConversationSummary, MemoryError> {
        let records = self.history.all(identity).await?;
        let mut key_facts: Vec<String> = Vec::new();
        for record in &records {
            let Some(serde_json::Value::Array(facts)) = record.metadata.get("key_facts") else {
                continue;
            };
            for fact in facts.iter().filter_map(|f| f.as_str()) {
                if !key_facts.iter().any(|k| k == fact) {
                    key_facts.push(fact.to_string());
                }
            }
        }

        Ok(ConversationSummary {
            total_interactions: records.len(),
            first_interaction: records.iter().map(|r| r.created_at).min(),
            last_interaction: records.iter().map(|r| r.created_at).max(),
            key_facts,
        })
    }

    /// Render the last turns as `User:` / `Assistant:` lines within `max_len` bytes.
    ///
    /// Stops before the first line that would overflow.
    pub fn build_context_string(turns: &[HistoryTurn], max_len: usize) -> String {
        let start = turns.len().saturating_sub(CONTEXT_STRING_TURNS);
        let mut out = String::new();
        for turn in &turns[start..] {
            let label = match turn.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Assistant",
            };
            let line = format!("{label}: {}\n", turn.content);
            if out.len() + line.len() > max_len {
                break;
            }
            out.push_str(&line);
        }
        out
    }

    // ── Long-term memory ──────────────────────────────────────────────────

    /// Embed and store `content`. Returns the new entry id.
    pub async fn save_long_term(
        &self,
        content: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<String, MemoryError> {
        let embedding = self.embedder.embed(content).await?;
        let id = uuid::Uuid::new_v4().to_string();
        let importance = importance_score(content);
        self.long_term
            .insert(LongTermEntry {
                id: id.clone(),
                content: content.to_string(),
                importance,
                created_at: Utc::now(),
                metadata,
                embedding,
            })
            .await?;
        debug!(importance, "Long-term memory stored");
        Ok(id)
    }

    /// Entries at least `threshold` similar to `query`, most similar first.
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<MemorySnippet>, MemoryError> {
        let embedding = self.embedder.embed(query).await?;
        let snippets = self.long_term.search(&embedding, limit, threshold).await?;
        debug!(results = snippets.len(), limit, threshold, "Long-term memory searched");
        Ok(snippets)
    }

    /// [`retrieve_relevant`](Self::retrieve_relevant) with the configured limit and threshold.
    pub async fn retrieve_relevant_default(
        &self,
        query: &str,
    ) -> Result<Vec<MemorySnippet>, MemoryError> {
        self.retrieve_relevant(query, self.config.relevance_limit, self.config.relevance_threshold)
            .await
    }
}
