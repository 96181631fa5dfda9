//! Per-request conversation context.

use crate::message::{ConversationId, HistoryTurn, InboundMessage, MessageType};
use serde::{Deserialize, Serialize};

/// Upper bound on history carried in a context.
pub const MAX_HISTORY_TURNS: usize = 20;

/// Everything the orchestrator knows about one inbound request.
///
/// Built fresh for every request from the session store and memory
/// manager. Its fields are written back individually, never as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: ConversationId,
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub current_message: String,
    pub message_type: MessageType,
    /// Oldest first, at most `MAX_HISTORY_TURNS`
    pub history: Vec<HistoryTurn>,
    pub session_data: serde_json::Map<String, serde_json::Value>,
    pub locale: String,
    pub correlation_id: String,
}

impl ConversationContext {
    pub fn from_inbound(message: &InboundMessage) -> Self {
        Self {
            conversation_id: message.conversation_id.clone(),
            identity: message.identity.clone(),
            user_id: None,
            display_name: None,
            current_message: message.text.clone(),
            message_type: message.message_type,
            history: Vec::new(),
            session_data: serde_json::Map::new(),
            locale: "en".into(),
            correlation_id: message.correlation_id.clone(),
        }
    }

    /// Replace the history, keeping only the newest `MAX_HISTORY_TURNS`.
    pub fn with_history(mut self, mut history: Vec<HistoryTurn>) -> Self {
        if history.len() > MAX_HISTORY_TURNS {
            history.drain(..history.len() - MAX_HISTORY_TURNS);
        }
        self.history = history;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    /// The last `n` history turns, oldest first.
    pub fn recent_history(&self, n: usize) -> &[HistoryTurn] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn session_str(&self, key: &str) -> Option<&str> {
        self.session_data.get(key).and_then(|v| v.as_str())
    }
}
