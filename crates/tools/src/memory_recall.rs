//! `memory_recall` lets an agent search long-term memory on demand.

use async_trait::async_trait;
use std::sync::Arc;
use switchboard_core::error::ToolError;
use switchboard_core::tool::{Tool, ToolContext};
use switchboard_memory::MemoryManager;

/// Upper bound on `limit` accepted from the model.
const MAX_LIMIT: u64 = 20;

pub struct MemoryRecallTool {
    memory: Arc<MemoryManager>,
}

impl MemoryRecallTool {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search long-term memory for facts stored in earlier conversations. \
         Use this when the user refers to something they told you before."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of memories to return",
                    "default": 5
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        let config = self.memory.config();
        let limit = arguments["limit"]
            .as_u64()
            .map(|l| l.clamp(1, MAX_LIMIT) as usize)
            .unwrap_or(config.relevance_limit);

        let snippets = self
            .memory
            .retrieve_relevant(query, limit, config.relevance_threshold)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: e.to_string(),
            })?;

        Ok(serde_json::json!({
            "query": query,
            "count": snippets.len(),
            "memories": snippets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_config::MemoryConfig;

    #[tokio::test]
    async fn recalls_stored_facts() {
        let memory = Arc::new(MemoryManager::in_memory(&MemoryConfig::default()));
        memory
            .save_long_term("preferred seat is by the window", serde_json::Map::new())
            .await
            .unwrap();
        let tool = MemoryRecallTool::new(memory);

        let args = serde_json::json!({"query": "preferred seat is by the window"});
        let out = tool.execute(args, &ToolContext::new("x", "c")).await.unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["memories"][0]["content"], "preferred seat is by the window");
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let memory = Arc::new(MemoryManager::in_memory(&MemoryConfig::default()));
        let tool = MemoryRecallTool::new(memory);

        let err = tool
            .execute(serde_json::json!({"query": "  "}), &ToolContext::new("x", "c"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
