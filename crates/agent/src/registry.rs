//! The agent registry: declared personas in routing order.

use switchboard_core::error::AgentError;
use switchboard_core::tool::ToolRegistry;
use switchboard_core::{AgentDefinition, AgentType};
use tracing::{debug, error};

/// Agent definitions ordered by ascending priority, then registration order.
///
/// Classification walks agents in this order, so when several agents'
/// triggers match a message the preferred one wins.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding [`default_agents`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for def in default_agents() {
            if let Err(e) = registry.register(def) {
                error!(error = %e, "Default agent rejected");
            }
        }
        registry
    }

    /// Add a definition, replacing any earlier one for the same agent type.
    ///
    /// A replaced definition keeps its registration slot.
    pub fn register(&mut self, def: AgentDefinition) -> Result<(), AgentError> {
        validate(&def)?;
        debug!(agent_type = %def.agent_type, priority = def.priority, "Registering agent");

        match self.agents.iter_mut().find(|a| a.agent_type == def.agent_type) {
            Some(existing) => *existing = def,
            None => self.agents.push(def),
        }
        // Stable: equal priorities stay in registration order.
        self.agents.sort_by_key(|a| a.priority);
        Ok(())
    }

    pub fn get(&self, agent_type: AgentType) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.agent_type == agent_type)
    }

    pub fn contains(&self, agent_type: AgentType) -> bool {
        self.get(agent_type).is_some()
    }

    /// Definitions in routing order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentDefinition> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Check every agent's enabled tools against `tools`.
    ///
    /// Returns the first agent that names a tool the registry lacks.
    pub fn validate_tools(&self, tools: &ToolRegistry) -> Result<(), AgentError> {
        for def in &self.agents {
            let missing: Vec<String> = def
                .enabled_tools
                .iter()
                .filter(|t| !tools.contains(t.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(AgentError::MissingTools { agent: def.agent_type.to_string(), missing });
            }
        }
        Ok(())
    }
}

fn validate(def: &AgentDefinition) -> Result<(), AgentError> {
    let invalid = |reason: String| AgentError::InvalidDefinition {
        agent: def.agent_type.to_string(),
        reason,
    };

    if !(0.0..=2.0).contains(&def.temperature) {
        return Err(invalid(format!("temperature {} is outside 0.0..=2.0", def.temperature)));
    }
    if def.max_tokens == 0 {
        return Err(invalid("max_tokens must be > 0".into()));
    }
    if def.system_prompt.trim().is_empty() {
        return Err(invalid("system prompt is empty".into()));
    }
    Ok(())
}

/// The built-in personas.
pub fn default_agents() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition::new(
            AgentType::CustomerService,
            "Customer Service",
            "You are a helpful customer service agent for a mobility and payments platform.\n\n\
             Your responsibilities:\n\
             - Greet users warmly in their preferred language (English, French, Kinyarwanda)\n\
             - Answer general questions about the platform's services\n\
             - Help with account issues\n\
             - Guide users to book trips, check their wallet balance, or use the marketplace\n\
             - Escalate complex issues to human support\n\n\
             Use simple, clear language and ask clarifying questions when needed.",
        )
        .with_sampling(0.7, 500)
        .with_tools(&["get_user_info", "search_help_articles", "create_support_ticket"])
        .with_triggers(&[
            "help", "support", "problem", "issue", "question", "how", "what", "hello", "hi", "hey",
            "bonjour", "muraho",
        ])
        .with_priority(1),
        AgentDefinition::new(
            AgentType::Booking,
            "Booking",
            "You are a travel booking specialist.\n\n\
             Your responsibilities:\n\
             - Help users search for bus and taxi routes\n\
             - Assist with trip booking (origin, destination, date, passengers)\n\
             - Show available seats and help with seat selection\n\
             - Provide trip details and confirmations\n\n\
             Be accurate with travel information and always confirm details before booking.",
        )
        .with_sampling(0.5, 600)
        .with_tools(&[
            "search_routes",
            "get_trip_details",
            "book_trip",
            "check_seat_availability",
            "get_booking_history",
        ])
        .with_triggers(&[
            "book", "trip", "travel", "bus", "taxi", "route", "seat", "destination", "kigali",
            "gisenyi", "musanze",
        ])
        .with_priority(2),
        AgentDefinition::new(
            AgentType::Wallet,
            "Wallet",
            "You are a wallet and payment specialist.\n\n\
             Your responsibilities:\n\
             - Help users check their wallet balance\n\
             - Process money transfers and top-ups\n\
             - Show transaction history\n\
             - Explain fees and limits\n\n\
             Be precise with amounts and always confirm them before a transfer.",
        )
        .with_sampling(0.3, 400)
        .with_tools(&[
            "get_wallet_balance",
            "transfer_money",
            "get_transaction_history",
            "initiate_topup",
        ])
        .with_triggers(&[
            "balance", "wallet", "money", "transfer", "send", "pay", "payment", "cash", "franc",
            "rwf",
        ])
        .with_priority(2),
        AgentDefinition::new(
            AgentType::Marketplace,
            "Marketplace",
            "You are a marketplace shopping assistant.\n\n\
             Your responsibilities:\n\
             - Help users discover products and services\n\
             - Provide product information and pricing\n\
             - Guide users through ordering and delivery tracking\n\n\
             Show relevant products and give clear pricing and delivery information.",
        )
        .with_sampling(0.6, 500)
        .with_tools(&["search_marketplace", "get_product_details", "create_order", "track_order"])
        .with_triggers(&[
            "shop", "buy", "product", "marketplace", "store", "order", "delivery", "price",
        ])
        .with_priority(3),
        AgentDefinition::new(
            AgentType::Support,
            "Support",
            "You are a technical support specialist.\n\n\
             Handle technical issues, complaints and feedback. Look for a help article first; \
             when none resolves the problem, open a support ticket and tell the user its reference.",
        )
        .with_sampling(0.4, 500)
        .with_tools(&["search_help_articles", "create_support_ticket"])
        .with_triggers(&["complaint", "bug", "error", "broken", "refund", "feedback"])
        .with_priority(4),
        AgentDefinition::new(
            AgentType::General,
            "General",
            "You are a general assistant.\n\n\
             Handle greetings, small talk and common questions, and point users to the right \
             service: booking a trip, their wallet, the marketplace, or support.",
        )
        .with_sampling(0.8, 400)
        .with_tools(&["get_user_info", "search_help_articles"])
        .with_priority(10),
    ]
}
