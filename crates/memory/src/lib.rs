//! Memory system for Switchboard.
//!
//! [`MemoryManager`] sits in front of a [`HistoryStore`] and a
//! [`LongTermStore`]: recent history is served through a TTL cache,
//! long-term entries are embedded and ranked by cosine similarity.
//!
//! [`HistoryStore`]: switchboard_core::memory::HistoryStore
//! [`LongTermStore`]: switchboard_core::memory::LongTermStore

pub mod embedder;
pub mod in_memory;
pub mod manager;
pub mod vector;

pub use embedder::{HashEmbedder, ProviderEmbedder};
pub use in_memory::{InMemoryHistoryStore, InMemoryLongTermStore};
pub use manager::{ConversationSummary, ImportantInfo, MemoryManager, importance_score};
pub use vector::{cosine_similarity, rank_by_similarity};
