//! Tool implementations for Switchboard agents.
//!
//! - [`FnTool`] adapts an async closure into a [`Tool`](switchboard_core::Tool).
//! - [`catalog`] declares the externally-executed business tools.
//! - [`MemoryRecallTool`] searches long-term memory.

pub mod catalog;
pub mod fn_tool;
pub mod memory_recall;

use std::sync::Arc;
use switchboard_core::tool::ToolRegistry;
use switchboard_memory::MemoryManager;

pub use catalog::{
    BackendHandle, ExternalTool, ToolBackend, external_tools, register_external_tools,
};
pub use fn_tool::FnTool;
pub use memory_recall::MemoryRecallTool;

/// A registry holding the catalog tools and `memory_recall`.
pub fn default_registry(memory: Arc<MemoryManager>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_external_tools(&mut registry);
    registry.register(MemoryRecallTool::new(memory));
    registry
}
