//! Agent routing and the per-message pipeline.
//!
//! - [`AgentRegistry`] holds the declared personas in routing order.
//! - [`Orchestrator`] classifies intent and runs an agent's tool-calling loop.
//! - [`InboundHandler`] wraps both with rate limiting, history, session
//!   data and metrics.
//! - [`Runtime`] assembles all of it from an `AppConfig`.

pub mod handler;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod session;

pub use handler::{HandlerOutcome, InboundHandler};
pub use orchestrator::{
    APOLOGY_TEXT, AgentResponse, Classification, ClassificationMethod, Orchestrator, extract_topic,
    locale_directive,
};

pub use registry::{AgentRegistry, default_agents};
pub use runtime::{Runtime, RuntimeBuilder, pricing_from_config};
pub use session::InMemorySessionStore;

#[cfg(test)]
pub(crate) mod test_helpers;
