//! Assembly of the message pipeline from configuration.

use std::sync::Arc;
use std::time::Duration;
use switchboard_config::AppConfig;
use switchboard_core::event::EventBus;
use switchboard_core::memory::{Embedder, HistoryStore, LongTermStore};
use switchboard_core::provider::Provider;
use switchboard_core::session::SessionStore;
use switchboard_core::tool::{PersistenceHandle, Tool};
use switchboard_core::{Error, Result};
use switchboard_memory::{
    HashEmbedder, InMemoryHistoryStore, InMemoryLongTermStore, MemoryManager, ProviderEmbedder,
};
use switchboard_security::RateLimiter;
use switchboard_telemetry::{AlertThresholds, MetricsAggregator, ModelPricing, PricingTable};
use switchboard_templates::{TemplateRegistry, TemplateSource};
use tokio::task::JoinHandle;
use tracing::info;

use crate::handler::InboundHandler;
use crate::orchestrator::Orchestrator;
use crate::registry::AgentRegistry;
use crate::session::InMemorySessionStore;

/// Default model prices with the config's `[pricing]` overrides applied.
pub fn pricing_from_config(config: &AppConfig) -> PricingTable {
    let pricing = PricingTable::with_defaults();
    for (model, price) in &config.pricing {
        pricing.set(model.clone(), ModelPricing::new(price.input_per_m, price.output_per_m));
    }
    pricing
}

/// Every shared service of a running pipeline.
pub struct Runtime {
    pub handler: Arc<InboundHandler>,
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Arc<MemoryManager>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsAggregator>,
    pub sessions: Arc<dyn SessionStore>,
    pub pricing: Arc<PricingTable>,
    pub events: Arc<EventBus>,
    sweep_interval: Duration,
}

impl Runtime {
    pub fn builder(config: AppConfig, provider: Arc<dyn Provider>) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            provider,
            agents: None,
            extra_tools: Vec::new(),
            sessions: None,
            persistence: None,
            template_source: None,
            memory: None,
            history_store: None,
            long_term_store: None,
            embedder: None,
        }
    }

    /// Start the rate limiter's periodic sweep.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        RateLimiter::spawn_sweeper(self.limiter.clone(), self.sweep_interval)
    }
}

pub struct RuntimeBuilder {
    config: AppConfig,
    provider: Arc<dyn Provider>,
    agents: Option<AgentRegistry>,
    extra_tools: Vec<Arc<dyn Tool>>,
    sessions: Option<Arc<dyn SessionStore>>,
    persistence: Option<Arc<dyn PersistenceHandle>>,
    template_source: Option<Arc<dyn TemplateSource>>,
    memory: Option<Arc<MemoryManager>>,
    history_store: Option<Arc<dyn HistoryStore>>,
    long_term_store: Option<Arc<dyn LongTermStore>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl RuntimeBuilder {
    /// Replace the default personas.
    pub fn with_agents(mut self, agents: AgentRegistry) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Register a tool on top of the defaults, replacing one of the same name.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push(tool);
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Handle passed to every tool call, usually a `BackendHandle`.
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceHandle>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_template_source(mut self, source: Arc<dyn TemplateSource>) -> Self {
        self.template_source = Some(source);
        self
    }

    /// Use a fully built memory manager. Store and embedder overrides are ignored.
    pub fn with_memory(mut self, memory: Arc<MemoryManager>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Durable conversation history in place of the in-process store.
    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn with_long_term_store(mut self, store: Arc<dyn LongTermStore>) -> Self {
        self.long_term_store = Some(store);
        self
    }

    /// Overrides the embedder chosen from `llm.embedding_model`.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Validate the configuration and wire the services together.
    ///
    /// Fails when an agent enables a tool that is not registered.
    pub fn build(self) -> Result<Runtime> {
        let config = self.config;
        config.validate().map_err(|e| Error::Config { message: e.to_string() })?;

        let pricing = Arc::new(pricing_from_config(&config));

        let memory = match self.memory {
            Some(memory) => memory,
            None => {
                let embedder: Arc<dyn Embedder> =
                    match (self.embedder, &config.llm.embedding_model) {
                        (Some(embedder), _) => embedder,
                        (None, Some(model)) => {
                            Arc::new(ProviderEmbedder::new(self.provider.clone(), model.clone()))
                        }
                        (None, None) => Arc::new(HashEmbedder::default()),
                    };
                let history =
                    self.history_store.unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new()));
                let long_term =
                    self.long_term_store.unwrap_or_else(|| Arc::new(InMemoryLongTermStore::new()));
                Arc::new(
                    MemoryManager::new(history, long_term, embedder, &config.memory)
                        .with_summarizer(self.provider.clone(), config.llm.model.clone()),
                )
            }
        };

        let mut tools = switchboard_tools::default_registry(memory.clone());
        for tool in self.extra_tools {
            tools.register_arc(tool);
        }

        let agents = self.agents.unwrap_or_else(AgentRegistry::with_defaults);
        agents.validate_tools(&tools)?;

        let sessions = self.sessions.unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let events = Arc::new(EventBus::default());

        let mut templates = TemplateRegistry::new(&config.templates);
        if let Some(source) = self.template_source {
            templates = templates.with_source(source);
        }

        let mut orchestrator = Orchestrator::new(
            self.provider,
            Arc::new(agents),
            Arc::new(tools),
            sessions.clone(),
            &config,
        )
        .with_templates(Arc::new(templates))
        .with_pricing(pricing.clone())
        .with_event_bus(events.clone());
        if let Some(persistence) = self.persistence {
            orchestrator = orchestrator.with_persistence(persistence);
        }
        let orchestrator = Arc::new(orchestrator);

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        let metrics = Arc::new(MetricsAggregator::new(
            AlertThresholds {
                latency_ms: config.metrics.alert_latency_ms,
                cost_usd: config.metrics.alert_cost_usd,
            },
            config.metrics.retention_minutes,
        ));

        let handler = Arc::new(
            InboundHandler::new(
                limiter.clone(),
                orchestrator.clone(),
                memory.clone(),
                sessions.clone(),
                metrics.clone(),
                config.memory.history_limit,
            )
            .with_event_bus(events.clone()),
        );

        info!(
            agents = orchestrator.agents().len(),
            embedder = memory.embedder_name(),
            model = %config.llm.model,
            streaming = config.llm.streaming,
            "Runtime assembled"
        );

        Ok(Runtime {
            handler,
            orchestrator,
            memory,
            limiter,
            metrics,
            sessions,
            pricing,
            events,
            sweep_interval: Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HandlerOutcome;
    use switchboard_config::PricingOverrideConfig;
    use switchboard_core::message::InboundMessage;
    use switchboard_core::{AgentDefinition, AgentType};
    use switchboard_providers::ScriptedProvider;

    #[tokio::test]
    async fn builds_with_defaults_and_handles_a_message() {
        let provider = Arc::new(ScriptedProvider::single_text("Hello!"));
        let runtime = Runtime::builder(AppConfig::default(), provider).build().unwrap();

        let outcome =
            runtime.handler.handle(InboundMessage::text("+250780000001", "c1", "hello")).await;
        assert!(matches!(outcome, HandlerOutcome::Replied(_)));
        assert_eq!(runtime.metrics.snapshot().total_requests, 1);
    }

    #[test]
    fn missing_agent_tool_fails_the_build() {
        let mut agents = AgentRegistry::new();
        let general = AgentDefinition::new(AgentType::General, "General", "You chat.")
            .with_tools(&["teleport"]);
        agents.register(general).unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let result = Runtime::builder(AppConfig::default(), provider).with_agents(agents).build();
        assert!(matches!(result, Err(Error::Agent(_))));
    }

    #[test]
    fn invalid_config_fails_the_build() {
        let mut config = AppConfig::default();
        config.orchestrator.max_tool_iterations = 0;
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        assert!(matches!(Runtime::builder(config, provider).build(), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn injected_history_store_receives_interactions() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let provider = Arc::new(ScriptedProvider::single_text("Hello!"));
        let runtime = Runtime::builder(AppConfig::default(), provider)
            .with_history_store(store.clone())
            .build()
            .unwrap();

        runtime.handler.handle(InboundMessage::text("+250780000002", "c2", "hello")).await;
        let saved = store.all("+250780000002").await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].assistant_text, "Hello!");
    }

    #[test]
    fn embedder_follows_embedding_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let offline = Runtime::builder(AppConfig::default(), provider.clone()).build().unwrap();
        assert_eq!(offline.memory.embedder_name(), "hash");

        let mut config = AppConfig::default();
        config.llm.embedding_model = Some("text-embedding-3-small".into());
        let hosted = Runtime::builder(config.clone(), provider.clone()).build().unwrap();
        assert_eq!(hosted.memory.embedder_name(), "text-embedding-3-small");

        let pinned = Runtime::builder(config, provider)
            .with_embedder(Arc::new(HashEmbedder::new(8)))
            .build()
            .unwrap();
        assert_eq!(pinned.memory.embedder_name(), "hash");
    }

    #[test]
    fn prebuilt_memory_is_shared() {
        let memory = Arc::new(MemoryManager::in_memory(&AppConfig::default().memory));
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let runtime = Runtime::builder(AppConfig::default(), provider)
            .with_memory(memory.clone())
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(&runtime.memory, &memory));
    }

    #[test]
    fn pricing_overrides_apply() {
        let mut config = AppConfig::default();
        config.pricing.insert(
            "house-model".into(),
            PricingOverrideConfig { input_per_m: 1.0, output_per_m: 2.0 },
        );

        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let runtime = Runtime::builder(config, provider).build().unwrap();
        let cost = runtime.pricing.compute_cost("house-model", 1_000_000, 1_000_000);
        assert!((cost - 3.0).abs() < 1e-9);
    }
}
