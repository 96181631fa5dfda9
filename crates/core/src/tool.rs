//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are how an agent acts on the outside world: look up a booking,
//! check a wallet balance, open a support ticket. The orchestrator only
//! knows a tool's name, schema and result; the business logic behind it
//! is opaque.

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// Opaque access to the persistence layer, handed to every tool call.
///
/// Concrete tools downcast through `as_any` to the handle type they
/// were built against.
pub trait PersistenceHandle: Send + Sync {
    fn name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

/// Handle used when no persistence layer is wired in.
#[derive(Debug, Default)]
pub struct NoPersistence;

impl PersistenceHandle for NoPersistence {
    fn name(&self) -> &str {
        "none"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Caller-scoped context passed to every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Caller identity (phone number or user id)
    pub identity: String,
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub persistence: Arc<dyn PersistenceHandle>,
}

impl ToolContext {
    pub fn new(identity: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            user_id: None,
            correlation_id: correlation_id.into(),
            persistence: Arc::new(NoPersistence),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceHandle>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("identity", &self.identity)
            .field("user_id", &self.user_id)
            .field("correlation_id", &self.correlation_id)
            .field("persistence", &self.persistence.name())
            .finish()
    }
}

/// The core Tool trait.
///
/// Tools are registered once at startup and are read-only thereafter.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_wallet_balance").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    ///
    /// Returns a JSON-serializable result, or an error that the caller
    /// turns into an error payload for the LLM.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A name→tool map.
///
/// The registry never retries a failed call; retry policy belongs to the
/// tool-calling loop.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the schema for one tool.
    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|t| t.to_definition())
    }

    /// Schemas for the named tools, in the order requested.
    ///
    /// Unknown names are skipped with a warning.
    pub fn definitions_for(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| {
                let def = self.definition(name);
                if def.is_none() {
                    warn!(tool = %name, "Enabled tool is not registered");
                }
                def
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> std::result::Result<serde_json::Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments, context).await
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
