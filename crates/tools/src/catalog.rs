//! External tool catalog.
//!
//! The business actions behind these tools (wallet ledger, trip booking,
//! marketplace orders) live in the persistence layer. Each catalog entry
//! carries only a name, a description and a parameter schema; execution
//! is forwarded to a [`ToolBackend`] reached through the call's
//! persistence handle. Without a backend the call fails and the failure
//! is fed back to the model like any other tool error.

use async_trait::async_trait;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use switchboard_core::error::ToolError;
use switchboard_core::tool::{PersistenceHandle, Tool, ToolContext, ToolRegistry};
use tracing::debug;

/// Executes catalog tools against real services.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn call(
        &self,
        tool: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError>;
}

/// A persistence handle exposing a [`ToolBackend`].
pub struct BackendHandle {
    name: String,
    backend: Arc<dyn ToolBackend>,
}

impl BackendHandle {
    pub fn new(name: impl Into<String>, backend: Arc<dyn ToolBackend>) -> Self {
        Self { name: name.into(), backend }
    }

    pub fn backend(&self) -> &Arc<dyn ToolBackend> {
        &self.backend
    }
}

impl PersistenceHandle for BackendHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A schema-only tool forwarded to the backend on the call's persistence handle.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: &'static str,
    description: &'static str,
    schema: serde_json::Value,
}

impl ExternalTool {
    pub fn new(name: &'static str, description: &'static str, schema: serde_json::Value) -> Self {
        Self { name, description, schema }
    }
}

#[async_trait]
impl Tool for ExternalTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        require_fields(self.name, &self.schema, &arguments)?;

        let handle = context
            .persistence
            .as_any()
            .downcast_ref::<BackendHandle>()
            .ok_or_else(|| ToolError::ExecutionFailed {
                tool_name: self.name.to_string(),
                reason: format!(
                    "no backend attached (persistence: {})",
                    context.persistence.name()
                ),
            })?;

        debug!(
            tool = self.name,
            backend = %handle.name(),
            correlation_id = %context.correlation_id,
            "Forwarding tool call"
        );
        handle.backend.call(self.name, arguments, context).await
    }
}

/// Reject calls missing a field the schema lists as required.
fn require_fields(
    tool: &str,
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> Result<(), ToolError> {
    let Some(required) = schema["required"].as_array() else {
        return Ok(());
    };
    let missing: Vec<&str> = required
        .iter()
        .filter_map(|f| f.as_str())
        .filter(|f| arguments.get(*f).is_none_or(|v| v.is_null()))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!("{tool}: missing {}", missing.join(", "))))
    }
}

fn no_params() -> serde_json::Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

fn query_param(description: &str) -> serde_json::Value {
    json!({
        "type": "object",
        "properties": { "query": { "type": "string", "description": description } },
        "required": ["query"]
    })
}

/// Every catalog tool referenced by the default agents.
pub fn external_tools() -> Vec<ExternalTool> {
    vec![
        // ── Account & support ──
        ExternalTool::new(
            "get_user_info",
            "Get user profile information including name, language preference, and account details",
            no_params(),
        ),
        ExternalTool::new(
            "search_help_articles",
            "Search help articles and FAQs",
            query_param("Search query"),
        ),
        ExternalTool::new(
            "create_support_ticket",
            "Create a support ticket for complex issues",
            json!({
                "type": "object",
                "properties": {
                    "subject": { "type": "string", "description": "Ticket subject" },
                    "description": { "type": "string", "description": "Detailed description of the issue" },
                    "category": {
                        "type": "string",
                        "enum": ["technical", "billing", "booking", "account", "other"],
                        "description": "Issue category"
                    }
                },
                "required": ["subject", "description"]
            }),
        ),
        // ── Booking ──
        ExternalTool::new(
            "search_routes",
            "Search for available bus/taxi routes between locations",
            json!({
                "type": "object",
                "properties": {
                    "origin": { "type": "string", "description": "Departure location" },
                    "destination": { "type": "string", "description": "Arrival location" },
                    "date": { "type": "string", "description": "Travel date (YYYY-MM-DD)" }
                },
                "required": ["origin", "destination"]
            }),
        ),
        ExternalTool::new(
            "get_trip_details",
            "Get details of a specific trip",
            json!({
                "type": "object",
                "properties": { "trip_id": { "type": "string", "description": "Trip identifier" } },
                "required": ["trip_id"]
            }),
        ),
        ExternalTool::new(
            "check_seat_availability",
            "Check available seats for a trip",
            json!({
                "type": "object",
                "properties": { "trip_id": { "type": "string", "description": "Trip identifier" } },
                "required": ["trip_id"]
            }),
        ),
        ExternalTool::new(
            "book_trip",
            "Book seats on a trip",
            json!({
                "type": "object",
                "properties": {
                    "trip_id": { "type": "string", "description": "Trip identifier" },
                    "seats": { "type": "integer", "description": "Number of seats", "minimum": 1 },
                    "payment_method": { "type": "string", "enum": ["wallet", "mobile_money", "cash"] }
                },
                "required": ["trip_id", "seats"]
            }),
        ),
        ExternalTool::new(
            "get_booking_history",
            "Get the user's past and upcoming bookings",
            no_params(),
        ),

        // ── Wallet ──
        ExternalTool::new("get_wallet_balance", "Check user's wallet balance", no_params()),
        ExternalTool::new(
            "get_transaction_history",
            "Get recent wallet transactions",
            json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "number", "description": "Number of transactions to return (default: 5, max: 20)" }
                },
                "required": []
            }),
        ),
        ExternalTool::new(
            "transfer_money",
            "Transfer money from the user's wallet to another user",
            json!({
                "type": "object",
                "properties": {
                    "recipient": { "type": "string", "description": "Recipient phone number" },
                    "amount": { "type": "number", "description": "Amount in RWF" },
                    "note": { "type": "string", "description": "Optional note" }
                },
                "required": ["recipient", "amount"]
            }),
        ),
        ExternalTool::new(
            "initiate_topup",
            "Start a wallet top-up",
            json!({
                "type": "object",
                "properties": { "amount": { "type": "number", "description": "Amount in RWF" } },
                "required": ["amount"]
            }),
        ),
        // ── Marketplace ──
        ExternalTool::new(
            "search_marketplace",
            "Search for products in the marketplace",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query for products" },
                    "category": { "type": "string", "description": "Product category filter (optional)" },
                    "max_price": { "type": "number", "description": "Maximum price filter (optional)" }
                },
                "required": ["query"]
            }),
        ),
        ExternalTool::new(
            "get_product_details",
            "Get details for one marketplace product",
            json!({
                "type": "object",
                "properties": { "product_id": { "type": "string" } },
                "required": ["product_id"]
            }),
        ),
        ExternalTool::new(
            "create_order",
            "Place a marketplace order",
            json!({
                "type": "object",
                "properties": {
                    "product_id": { "type": "string" },
                    "quantity": { "type": "integer", "minimum": 1 }
                },
                "required": ["product_id", "quantity"]
            }),
        ),
        ExternalTool::new(
            "track_order",
            "Get the delivery status of an order",
            json!({
                "type": "object",
                "properties": { "order_id": { "type": "string" } },
                "required": ["order_id"]
            }),
        ),
    ]
}

/// Register every catalog tool.
pub fn register_external_tools(registry: &mut ToolRegistry) {
    for tool in external_tools() {
        registry.register(tool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend;

    #[async_trait]
    impl ToolBackend for FixedBackend {
        async fn call(
            &self,
            tool: &str,
            _arguments: serde_json::Value,
            context: &ToolContext,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(json!({ "tool": tool, "user": context.user_id, "balance": 1200, "currency": "RWF" }))
        }
    }

    #[tokio::test]
    async fn forwards_to_attached_backend() {
        let mut registry = ToolRegistry::new();
        register_external_tools(&mut registry);
        let ctx = ToolContext::new("+250780000123", "corr-1")
            .with_user_id("user-7")
            .with_persistence(Arc::new(BackendHandle::new("ledger", Arc::new(FixedBackend))));

        let out = registry.execute("get_wallet_balance", json!({}), &ctx).await.unwrap();
        assert_eq!(out["tool"], "get_wallet_balance");
        assert_eq!(out["user"], "user-7");
    }

    #[tokio::test]
    async fn without_backend_execution_fails() {
        let mut registry = ToolRegistry::new();
        register_external_tools(&mut registry);
        let err = registry
            .execute("get_wallet_balance", json!({}), &ToolContext::new("x", "c"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::ExecutionFailed { ref tool_name, .. } if tool_name == "get_wallet_balance"
        ));

    }

    #[tokio::test]
    async fn missing_required_fields_rejected_before_backend() {
        let tool = external_tools().into_iter().find(|t| t.name() == "search_routes").unwrap();
        let err = tool
            .execute(json!({ "origin": "Kigali" }), &ToolContext::new("x", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(msg) if msg.contains("destination")));
    }

    #[test]
    fn catalog_names_are_unique() {
        let tools = external_tools();
        let mut names: Vec<_> = tools.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }
}
