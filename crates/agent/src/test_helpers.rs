//! Shared fixtures for orchestrator and handler tests.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use switchboard_config::AppConfig;
use switchboard_core::ConversationContext;
use switchboard_core::message::{HistoryTurn, InboundMessage};
use switchboard_core::tool::ToolRegistry;
use switchboard_providers::ScriptedProvider;
use switchboard_tools::FnTool;

use crate::{AgentRegistry, InMemorySessionStore, Orchestrator};

pub const TEST_IDENTITY: &str = "+250780000000";

pub fn context(text: &str) -> ConversationContext {
    ConversationContext::from_inbound(&InboundMessage::text(TEST_IDENTITY, "conv-test", text))
}

/// `n` alternating turns labelled `turn 0`, `turn 1`, ... oldest first.
pub fn history(n: usize) -> Vec<HistoryTurn> {
    let start = Utc::now() - Duration::minutes(n as i64);
    (0..n)
        .map(|i| {
            let at = start + Duration::minutes(i as i64);
            let text = format!("turn {i}");
            if i % 2 == 0 { HistoryTurn::user(text, at) } else { HistoryTurn::assistant(text, at) }
        })
        .collect()
}

/// Tools that echo their name and arguments back.
pub fn recording_tools(names: &[&str]) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for name in names {
        let tool_name = name.to_string();
        registry.register(FnTool::new(
            *name,
            format!("Test tool {name}"),
            json!({"type": "object"}),
            move |args, _ctx| {
                let tool_name = tool_name.clone();
                async move { Ok(json!({"tool": tool_name, "args": args})) }
            },
        ));
    }
    Arc::new(registry)
}

/// Recording tools for every tool the default agents enable.
pub fn default_recording_tools() -> Arc<ToolRegistry> {
    let registry = AgentRegistry::with_defaults();
    let mut names: Vec<&str> =
        registry.iter().flat_map(|a| a.enabled_tools.iter().map(String::as_str)).collect();

    names.sort_unstable();
    names.dedup();
    recording_tools(&names)
}

/// Default agents and tools, fresh session store.
pub fn orchestrator(provider: Arc<ScriptedProvider>) -> Orchestrator {
    orchestrator_with_tools(provider, default_recording_tools())
}

pub fn orchestrator_with_tools(
    provider: Arc<ScriptedProvider>,
    tools: Arc<ToolRegistry>,
) -> Orchestrator {
    orchestrator_with_config(provider, tools, &AppConfig::default())
}

pub fn orchestrator_with_config(
    provider: Arc<ScriptedProvider>,
    tools: Arc<ToolRegistry>,
    config: &AppConfig,
) -> Orchestrator {
    Orchestrator::new(
        provider,
        Arc::new(AgentRegistry::with_defaults()),
        tools,
        Arc::new(InMemorySessionStore::new()),
        config,
    )
}
