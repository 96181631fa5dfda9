//! Session store boundary: conversation→agent affinity and session data.

use crate::agent::AgentType;
use crate::error::SessionError;
use crate::message::ConversationId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything persisted for one conversation between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub conversation_id: ConversationId,

    /// Agent selected on a prior turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentType>,

    /// Free-form key/value data (`last_agent`, `last_topic`, ...)
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            agent: None,
            data: serde_json::Map::new(),
            locale: None,
            display_name: None,
            user_id: None,
            updated_at: Utc::now(),
        }
    }
}

/// External persistence for session records.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<SessionRecord>, SessionError>;

    /// Record `agent` as the conversation's current agent.
    async fn set_agent(
        &self,
        conversation_id: &ConversationId,
        agent: AgentType,
    ) -> Result<(), SessionError>;

    /// Drop the conversation's agent assignment.
    async fn clear_agent(&self, conversation_id: &ConversationId) -> Result<(), SessionError>;

    /// Shallow-merge `data` into the session's key/value map.
    async fn merge_data(
        &self,
        conversation_id: &ConversationId,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SessionError>;

    /// Insert or replace the whole record.
    async fn save(&self, record: SessionRecord) -> Result<(), SessionError>;
}
