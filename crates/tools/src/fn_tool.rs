//! Closure-backed tools.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use switchboard_core::error::ToolError;
use switchboard_core::tool::{Tool, ToolContext};

type HandlerFuture = BoxFuture<'static, Result<serde_json::Value, ToolError>>;
type Handler = Arc<dyn Fn(serde_json::Value, ToolContext) -> HandlerFuture + Send + Sync>;

/// A tool built from a name, description, schema and an async closure.
///
/// ```ignore
/// let schema = json!({"type": "object"});
/// let echo = FnTool::new("echo", "Echo the input", schema, |args, _ctx| async move { Ok(args) });

/// ```
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        (self.handler)(arguments, context.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::tool::ToolRegistry;

    #[tokio::test]
    async fn closure_receives_args_and_context() {
        let tool = FnTool::new(
            "whoami",
            "Report the caller",
            serde_json::json!({"type": "object", "properties": {}}),
            |args, ctx| async move {
                Ok(serde_json::json!({ "identity": ctx.identity, "echo": args["x"] }))
            },
        );
        let mut registry = ToolRegistry::new();
        registry.register(tool);

        let ctx = ToolContext::new("+250780000123", "corr-1");
        let out = registry
            .execute("whoami", serde_json::json!({"x": 3}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["identity"], "+250780000123");
        assert_eq!(out["echo"], 3);
        assert_eq!(registry.definition("whoami").unwrap().description, "Report the caller");
    }

    #[tokio::test]
    async fn handler_errors_propagate_typed() {
        let tool = FnTool::new("boom", "Always fails", serde_json::json!({}), |_args, _ctx| async {
            Err(ToolError::ExecutionFailed {
                tool_name: "boom".into(),
                reason: "downstream 503".into(),
            })

        });
        let err = tool
            .execute(serde_json::json!({}), &ToolContext::new("x", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }
}
