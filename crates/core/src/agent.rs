//! Agent types and definitions.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of agent personas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    CustomerService,
    Booking,
    Wallet,
    Marketplace,
    Support,
    General,
}

impl AgentType {
    /// Every variant, in declaration order.
    pub const ALL: [AgentType; 6] = [
        AgentType::CustomerService,
        AgentType::Booking,
        AgentType::Wallet,
        AgentType::Marketplace,
        AgentType::Support,
        AgentType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerService => "customer_service",
            Self::Booking => "booking",
            Self::Wallet => "wallet",
            Self::Marketplace => "marketplace",
            Self::Support => "support",
            Self::General => "general",
        }
    }

    /// The generic catch-all agent. Never used for session affinity.
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::General)
    }

    /// Parse a free-form label, tolerating case, quotes, punctuation and
    /// spaces or hyphens in place of underscores.
    pub fn parse_label(raw: &str) -> Result<Self, AgentError> {
        let normalized: String = raw
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        normalized.parse()
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AgentError::UnknownLabel(s.to_string()))
    }
}

/// A declared agent: prompt, sampling parameters, tools and routing triggers.
///
/// Immutable once loaded into the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub agent_type: AgentType,

    /// Display name
    pub name: String,

    pub system_prompt: String,

    pub temperature: f32,

    pub max_tokens: u32,

    /// Tool names, in the order their schemas are sent to the LLM
    #[serde(default)]
    pub enabled_tools: Vec<String>,

    /// Lowercase keywords matched as substrings of the inbound message
    #[serde(default)]
    pub triggers: Vec<String>,

    /// Lower values are preferred when several agents match
    pub priority: u32,
}

impl AgentDefinition {
    pub fn new(
        agent_type: AgentType,
        name: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            agent_type,
            name: name.into(),
            system_prompt: system_prompt.into(),
            temperature: 0.7,
            max_tokens: 500,
            enabled_tools: Vec::new(),
            triggers: Vec::new(),
            priority: 5,
        }
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.enabled_tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_triggers(mut self, triggers: &[&str]) -> Self {
        self.triggers = triggers.iter().map(|t| t.to_lowercase()).collect();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// The first trigger found in `lowercase_text`, if any.
    pub fn matching_trigger(&self, lowercase_text: &str) -> Option<&str> {
        self.triggers
            .iter()
            .find(|t| !t.is_empty() && lowercase_text.contains(t.as_str()))
            .map(|t| t.as_str())
    }
}
