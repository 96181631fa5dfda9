//! Process-local session store.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use switchboard_core::AgentType;
use switchboard_core::error::SessionError;
use switchboard_core::message::ConversationId;
use switchboard_core::session::{SessionRecord, SessionStore};
use tokio::sync::RwLock;

/// Sessions held in a map for the life of the process.
///
/// Agent affinity and session data are not shared between instances;
/// a multi-process deployment needs an external `SessionStore`.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<ConversationId, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.sessions.read().await.get(conversation_id).cloned())
    }

    async fn set_agent(
        &self,
        conversation_id: &ConversationId,
        agent: AgentType,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(conversation_id.clone())
            .or_insert_with(|| SessionRecord::new(conversation_id.clone()));
        record.agent = Some(agent);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn clear_agent(&self, conversation_id: &ConversationId) -> Result<(), SessionError> {
        if let Some(record) = self.sessions.write().await.get_mut(conversation_id) {
            record.agent = None;
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn merge_data(
        &self,
        conversation_id: &ConversationId,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(conversation_id.clone())
            .or_insert_with(|| SessionRecord::new(conversation_id.clone()));
        record.data.extend(data);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save(&self, record: SessionRecord) -> Result<(), SessionError> {
        self.sessions.write().await.insert(record.conversation_id.clone(), record);
        Ok(())
    }
}
