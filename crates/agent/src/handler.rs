//! The inbound pipeline for one message.
//!
//! Rate limit, build context, classify, process, persist, record metrics.
//! With `memory.extract_key_facts` on, each saved exchange also carries the
//! facts, preferences and decisions the LLM pulled out of it.
//! A rejected request never reaches the LLM.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use switchboard_core::ConversationContext;
use switchboard_core::event::{DomainEvent, EventBus};
use switchboard_core::message::{HistoryTurn, InboundMessage};
use switchboard_core::session::SessionStore;
use switchboard_memory::MemoryManager;
use switchboard_security::{RateLimitDecision, RateLimiter, mask_identity};
use switchboard_telemetry::{MetricSample, MetricsAggregator};
use tracing::{error, info, warn};

use crate::orchestrator::{AgentResponse, Orchestrator};

/// How one inbound message was handled.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Replied(AgentResponse),
    /// Refused by the rate limiter
    Rejected { decision: RateLimitDecision, message: String },
    /// Processing failed after the request was admitted
    Failed { message: String, correlation_id: String },
}

impl HandlerOutcome {
    /// Text to send back to the caller.
    pub fn reply_text(&self) -> &str {
        match self {
            Self::Replied(response) => &response.text,
            Self::Rejected { message, .. } | Self::Failed { message, .. } => message,
        }
    }
}

pub struct InboundHandler {
    limiter: Arc<RateLimiter>,
    orchestrator: Arc<Orchestrator>,
    memory: Arc<MemoryManager>,
    sessions: Arc<dyn SessionStore>,
    metrics: Arc<MetricsAggregator>,
    history_limit: usize,
    events: Option<Arc<EventBus>>,
}

impl InboundHandler {
    pub fn new(
        limiter: Arc<RateLimiter>,
        orchestrator: Arc<Orchestrator>,
        memory: Arc<MemoryManager>,
        sessions: Arc<dyn SessionStore>,
        metrics: Arc<MetricsAggregator>,
        history_limit: usize,
    ) -> Self {
        Self { limiter, orchestrator, memory, sessions, metrics, history_limit, events: None }
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    pub async fn handle(&self, message: InboundMessage) -> HandlerOutcome {
        self.handle_at(message, Utc::now()).await
    }

    /// Handle `message` as if it arrived at `now`.
    pub async fn handle_at(&self, message: InboundMessage, now: DateTime<Utc>) -> HandlerOutcome {
        let started = Instant::now();
        let masked = mask_identity(&message.identity);

        let decision = self.limiter.check(&message.identity, now);
        if let Some(text) = decision.user_message() {
            warn!(
                correlation_id = %message.correlation_id,
                identity = %masked,
                blacklisted = decision.blacklisted,
                retry_after_secs = ?decision.retry_after_secs,
                "Request rejected by rate limiter"
            );
            self.publish(DomainEvent::RequestRejected {
                identity: masked,
                blacklisted: decision.blacklisted,
                timestamp: now,
            });
            return HandlerOutcome::Rejected { decision, message: text };
        }

        info!(
            correlation_id = %message.correlation_id,
            identity = %masked,
            conversation_id = %message.conversation_id,
            message_type = ?message.message_type,
            "Inbound message"
        );
        self.publish(DomainEvent::MessageReceived {
            conversation_id: message.conversation_id.to_string(),
            identity: masked,
            timestamp: now,
        });

        let ctx = self.build_context(&message).await;
        let classification = self.orchestrator.classify_intent(&ctx).await;

        match self.orchestrator.process_with_agent(&ctx, classification.agent_type).await {
            Ok(mut response) => {
                response.confidence = Some(classification.confidence);
                self.persist(&ctx, &response).await;
                let sample = MetricSample::success(
                    response.agent_type.as_str(),
                    response.tokens_used,
                    response.cost_usd,
                    response.latency_ms,
                )
                .with_tools(response.tools_used.clone());
                self.metrics.record(&sample, now);
                HandlerOutcome::Replied(response)
            }
            Err(e) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                error!(
                    correlation_id = %ctx.correlation_id,
                    agent_type = %classification.agent_type,
                    latency_ms,
                    error = %e,
                    "Message processing failed"
                );
                self.publish(DomainEvent::ErrorOccurred {
                    context: format!("process_with_agent({})", classification.agent_type),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                let sample = MetricSample::failure(classification.agent_type.as_str(), latency_ms)
                    .with_error(e.to_string());
                self.metrics.record(&sample, now);
                HandlerOutcome::Failed {
                    message: format!(
                        "Sorry, something went wrong on our side. Please try again in a moment. (ref: {})",
                        ctx.correlation_id
                    ),
                    correlation_id: ctx.correlation_id.clone(),
                }
            }
        }
    }

    async fn build_context(&self, message: &InboundMessage) -> ConversationContext {
        let history = self.memory.get_history(&message.identity, self.history_limit).await;
        let mut ctx = ConversationContext::from_inbound(message).with_history(history);

        match self.sessions.load(&message.conversation_id).await {
            Ok(Some(record)) => {
                let locale = record.locale.clone().or_else(|| {
                    record.data.get("preferred_language").and_then(|v| v.as_str()).map(String::from)
                });
                if let Some(locale) = locale {
                    ctx = ctx.with_locale(locale);
                }
                ctx.display_name = record.display_name;
                ctx.user_id = record.user_id;
                ctx.session_data = record.data;
            }
            Ok(None) => {}
            Err(e) => warn!(
                correlation_id = %message.correlation_id,
                error = %e,
                "Session load failed, continuing without it"
            ),
        }
        ctx
    }

    async fn persist(&self, ctx: &ConversationContext, response: &AgentResponse) {
        if let Err(e) =
            self.sessions.merge_data(&ctx.conversation_id, response.session_data.clone()).await
        {
            warn!(correlation_id = %ctx.correlation_id, error = %e, "Session data not saved");
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert("agent_type".into(), json!(response.agent_type));
        metadata.insert("tools_used".into(), json!(response.tools_used));
        metadata.insert("correlation_id".into(), json!(ctx.correlation_id));
        if self.memory.config().extract_key_facts {
            let info = self.memory.extract_important_info(&recent_exchange(ctx, response)).await;
            if !info.is_empty() {
                metadata.insert("key_facts".into(), json!(info.facts));
                metadata.insert("preferences".into(), json!(info.preferences));
                metadata.insert("decisions".into(), json!(info.decisions));
            }
        }
        if let Err(e) = self
            .memory
            .save_interaction(&ctx.identity, &ctx.current_message, &response.text, metadata)
            .await
        {
            warn!(
                correlation_id = %ctx.correlation_id,
                error = %e,
                "Interaction not saved to history"
            );
        }
    }
}

/// Turns shown to the key fact extractor: a little history plus this exchange.
fn recent_exchange(ctx: &ConversationContext, response: &AgentResponse) -> Vec<HistoryTurn> {
    const PRIOR_TURNS: usize = 4;
    let now = Utc::now();
    let start = ctx.history.len().saturating_sub(PRIOR_TURNS);
    let mut turns = ctx.history[start..].to_vec();
    turns.push(HistoryTurn::user(ctx.current_message.clone(), now));
    turns.push(HistoryTurn::assistant(response.text.clone(), now));
    turns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use crate::{AgentRegistry, InMemorySessionStore};
    use chrono::Duration;
    use serde_json::json;
    use switchboard_config::{AppConfig, MemoryConfig, RateLimitConfig};
    use switchboard_core::AgentType;
    use switchboard_core::error::ProviderError;
    use switchboard_core::session::SessionRecord;
    use switchboard_providers::ScriptedProvider;
    use switchboard_providers::mock::{text_response, tool_call, tool_call_response};
    use switchboard_telemetry::AlertThresholds;

    struct Fixture {
        handler: InboundHandler,
        provider: Arc<ScriptedProvider>,
        memory: Arc<MemoryManager>,
        sessions: Arc<InMemorySessionStore>,
    }

    fn fixture(provider: ScriptedProvider, max_requests: u32) -> Fixture {
        fixture_with_memory(provider, max_requests, MemoryConfig::default())
    }

    fn fixture_with_memory(
        provider: ScriptedProvider,
        max_requests: u32,
        memory: MemoryConfig,
    ) -> Fixture {
        let config = AppConfig { memory, ..AppConfig::default() };
        let provider = Arc::new(provider);
        let sessions = Arc::new(InMemorySessionStore::new());
        let memory = MemoryManager::in_memory(&config.memory)
            .with_summarizer(provider.clone(), "gpt-4o-mini");
        let memory = Arc::new(memory);

        let orchestrator = Orchestrator::new(
            provider.clone(),
            Arc::new(AgentRegistry::with_defaults()),
            default_recording_tools(),
            sessions.clone(),
            &config,
        );
        let limiter =
            RateLimiter::new(&RateLimitConfig { max_requests, ..RateLimitConfig::default() });
        let handler = InboundHandler::new(
            Arc::new(limiter),
            Arc::new(orchestrator),
            memory.clone(),
            sessions.clone(),
            Arc::new(MetricsAggregator::new(AlertThresholds::default(), 60)),
            config.memory.history_limit,
        );
        Fixture { handler, provider, memory, sessions }
    }

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage::text(TEST_IDENTITY, "conv-handler", text)
    }

    #[tokio::test]
    async fn reply_is_persisted_and_measured() {
        let f = fixture(
            ScriptedProvider::new(vec![
                tool_call_response(vec![tool_call("get_wallet_balance", json!({}))]),
                text_response("You have 1200 RWF."),
            ]),
            10,
        );

        let outcome = f.handler.handle(inbound("My wallet balance please")).await;
        let HandlerOutcome::Replied(response) = outcome else {
            panic!("expected a reply, got {outcome:?}")
        };
        assert_eq!(response.agent_type, AgentType::Wallet);
        assert_eq!(response.confidence, Some(0.9));
        assert_eq!(response.text, "You have 1200 RWF.");

        let turns = f.memory.get_history(TEST_IDENTITY, 20).await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "You have 1200 RWF.");

        let record = f.sessions.load(&switchboard_core::ConversationId::from("conv-handler")).await.unwrap().unwrap();
        assert_eq!(record.data["last_topic"], "wallet");
        assert_eq!(record.agent, Some(AgentType::Wallet));

        let snapshot = f.handler.metrics().snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.tool_executions, 1);
    }

    #[tokio::test]
    async fn repeated_history_is_fed_back() {
        let f = fixture(
            ScriptedProvider::new(vec![text_response("Hello!"), text_response("Still here.")]),
            10,
        );
        f.handler.handle(inbound("hello")).await;
        f.handler.handle(inbound("hello again")).await;

        let second = &f.provider.requests()[1];
        let contents: Vec<_> = second.messages.iter().map(|m| m.content.as_str()).collect();
        assert!(contents.contains(&"Hello!"));
        assert_eq!(*contents.last().unwrap(), "hello again");
    }

    #[tokio::test]
    async fn over_limit_is_rejected_before_the_llm() {
        let f = fixture(ScriptedProvider::new(vec![text_response("one"), text_response("two")]), 2);
        let now = Utc::now();

        for _ in 0..2 {
            let outcome = f.handler.handle_at(inbound("hi"), now).await;
            assert!(matches!(outcome, HandlerOutcome::Replied(_)));
        }
        let calls = f.provider.call_count();

        let rejected = f.handler.handle_at(inbound("hi"), now).await;
        let HandlerOutcome::Rejected { decision, message } = &rejected else {
            panic!("expected rejection")
        };
        assert!(!decision.allowed);
        assert!(message.contains("too quickly"));
        assert_eq!(f.provider.call_count(), calls);
        assert_eq!(f.handler.metrics().snapshot().total_requests, 2);

        let later = now + Duration::seconds(61);
        f.provider.push(Ok(text_response("three")));
        let outcome = f.handler.handle_at(inbound("hi"), later).await;
        assert!(matches!(outcome, HandlerOutcome::Replied(_)));
    }

    #[tokio::test]
    async fn provider_failure_yields_apology_with_reference() {
        let f = fixture(
            ScriptedProvider::with_outcomes(vec![Err(ProviderError::Network(
                "connection reset".into(),
            ))]),
            10,
        );
        let msg = inbound("hello");
        let correlation_id = msg.correlation_id.clone();

        let outcome = f.handler.handle(msg).await;
        let HandlerOutcome::Failed { message, correlation_id: reported } = &outcome else {
            panic!("expected failure")
        };
        assert_eq!(reported, &correlation_id);
        assert!(message.contains(&correlation_id));
        assert_eq!(outcome.reply_text(), message);

        let snapshot = f.handler.metrics().snapshot();
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.successful_requests, 0);
        assert!(f.memory.get_history(TEST_IDENTITY, 20).await.is_empty());
    }

    #[tokio::test]
    async fn extracted_key_facts_are_saved_with_the_exchange() {
        let memory = MemoryConfig { extract_key_facts: true, ..MemoryConfig::default() };
        let f = fixture_with_memory(
            ScriptedProvider::new(vec![
                text_response("Your bus to Huye leaves at 9."),
                text_response(
                    r#"{"facts": ["travels to Huye"], "preferences": ["morning departures"], "decisions": []}"#,
                ),
            ]),
            10,
            memory,
        );

        let outcome = f.handler.handle(inbound("Book a bus to Huye tomorrow morning")).await;
        assert!(matches!(outcome, HandlerOutcome::Replied(_)));
        assert_eq!(f.provider.call_count(), 2);
        let extraction = &f.provider.requests()[1];
        assert!(extraction.messages[1].content.contains("user: Book a bus to Huye"));
        let transcript = &extraction.messages[1].content;
        assert!(transcript.contains("assistant: Your bus to Huye leaves at 9."));

        let summary = f.memory.conversation_summary(TEST_IDENTITY).await.unwrap();
        assert_eq!(summary.key_facts, vec!["travels to Huye"]);
    }

    #[tokio::test]
    async fn failed_extraction_still_saves_the_exchange() {
        let memory = MemoryConfig { extract_key_facts: true, ..MemoryConfig::default() };
        let f = fixture_with_memory(
            ScriptedProvider::single_text("Your bus to Huye leaves at 9."),
            10,
            memory,
        );


        let outcome = f.handler.handle(inbound("Book a bus to Huye")).await;
        assert!(matches!(outcome, HandlerOutcome::Replied(_)));

        let summary = f.memory.conversation_summary(TEST_IDENTITY).await.unwrap();
        assert_eq!(summary.total_interactions, 1);
        assert!(summary.key_facts.is_empty());
    }

    #[tokio::test]
    async fn session_profile_shapes_context() {
        let f = fixture(ScriptedProvider::single_text("Habari!"), 10);
        let mut record = SessionRecord::new(switchboard_core::ConversationId::from("conv-handler"));
        record.locale = Some("sw".into());
        record.display_name = Some("Aline".into());
        f.sessions.save(record).await.unwrap();

        f.handler.handle(inbound("hello")).await;
        let system = &f.provider.requests()[0].messages[0].content;
        assert!(system.contains("Kiswahili"));
    }
}
