//! # Switchboard Core
//!
//! Domain types, traits, and error definitions for the Switchboard
//! conversational-agent runtime. Every subsystem boundary (LLM backend,
//! tools, memory stores, session store) is a trait here; implementations
//! live in their own crates and depend inward on this one.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;
pub mod memory;
pub mod agent;
pub mod context;
pub mod session;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{
    ConversationId, HistoryTurn, InboundMessage, Message, MessageType, Role, TurnRole,
};
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{PersistenceHandle, Tool, ToolCall, ToolContext, ToolRegistry};
pub use memory::{
    Embedder, HistoryStore, InteractionRecord, LongTermEntry, LongTermStore, MemorySnippet,
};
pub use agent::{AgentDefinition, AgentType};
pub use context::ConversationContext;
pub use session::{SessionRecord, SessionStore};
pub use event::{DomainEvent, EventBus};
