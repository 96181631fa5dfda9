//! Pipeline events fanned out to whoever is listening.
//!
//! The handler and orchestrator publish as a message moves through rate
//! limiting, routing, tool execution and reply generation. Nothing in the
//! pipeline waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An inbound message passed the rate limiter
    MessageReceived {
        conversation_id: String,
        /// Masked caller identity
        identity: String,
        timestamp: DateTime<Utc>,
    },

    RequestRejected {
        identity: String,
        blacklisted: bool,
        timestamp: DateTime<Utc>,
    },

    AgentSelected {
        conversation_id: String,
        agent_type: String,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },

    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    ResponseGenerated {
        conversation_id: String,
        agent_type: String,
        tokens_used: u32,
        cost_usd: f64,
        timestamp: DateTime<Utc>,
    },

    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// Upper-snake name, matching the `event` field used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "MESSAGE_RECEIVED",
            Self::RequestRejected { .. } => "REQUEST_REJECTED",
            Self::AgentSelected { .. } => "AGENT_SELECTED",
            Self::ToolExecuted { .. } => "TOOL_EXECUTED",
            Self::ResponseGenerated { .. } => "RESPONSE_GENERATED",
            Self::ErrorOccurred { .. } => "ERROR_OCCURRED",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::MessageReceived { timestamp, .. }
            | Self::RequestRejected { timestamp, .. }
            | Self::AgentSelected { timestamp, .. }
            | Self::ToolExecuted { timestamp, .. }
            | Self::ResponseGenerated { timestamp, .. }
            | Self::ErrorOccurred { timestamp, .. } => *timestamp,
        }
    }
}

/// Broadcast fan-out of [`DomainEvent`]s.
///
/// Slow subscribers lag and lose the oldest events once `capacity` is
/// exceeded; publishers never block.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: DomainEvent) -> usize {
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
