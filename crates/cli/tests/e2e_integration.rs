//! End-to-end tests for the Switchboard inbound pipeline.
//!
//! These drive `InboundHandler` through a fully assembled `Runtime`:
//! rate limiting, classification, the tool-calling loop against a fake
//! business backend, templates, session affinity and memory.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use switchboard_agent::{APOLOGY_TEXT, AgentRegistry, HandlerOutcome, Runtime, default_agents};
use switchboard_config::{AppConfig, RateLimitConfig, TemplateEntryConfig};
use switchboard_core::AgentType;
use switchboard_core::error::{ProviderError, ToolError};
use switchboard_core::message::{ConversationId, InboundMessage};
use switchboard_core::tool::ToolContext;
use switchboard_providers::ScriptedProvider;
use switchboard_providers::mock::{text_response, tool_call, tool_call_response};
use switchboard_templates::Delivery;
use switchboard_tools::{BackendHandle, ToolBackend};

const IDENTITY: &str = "+250780000000";

// ── Fake backend ─────────────────────────────────────────────────────────

/// Records every forwarded call and answers with canned business data.
#[derive(Default)]
struct FakeBackend {
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeBackend {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ToolBackend for FakeBackend {
    async fn call(
        &self,
        tool: &str,
        arguments: serde_json::Value,
        context: &ToolContext,
    ) -> Result<serde_json::Value, ToolError> {
        self.calls.lock().unwrap().push((tool.to_string(), arguments.clone()));
        match tool {
            "get_wallet_balance" => {
                Ok(json!({ "balance": 1200, "currency": "RWF", "identity": context.identity }))
            }
            "get_transaction_history" => {
                Ok(json!({ "transactions": [{ "amount": -500 }, { "amount": 2000 }] }))
            }
            "search_routes" => Ok(json!({ "routes": [{ "id": "r1", "departure": "09:00" }] })),
            other => Err(ToolError::ExecutionFailed {
                tool_name: other.into(),
                reason: "not stubbed".into(),
            }),
        }
    }
}

struct Harness {
    runtime: Runtime,
    provider: Arc<ScriptedProvider>,
    backend: Arc<FakeBackend>,
}

fn harness_with(
    config: AppConfig,
    provider: ScriptedProvider,
    agents: Option<AgentRegistry>,
) -> Harness {
    let provider = Arc::new(provider);
    let backend = Arc::new(FakeBackend::default());
    let mut builder = Runtime::builder(config, provider.clone())
        .with_persistence(Arc::new(BackendHandle::new("fake", backend.clone())));
    if let Some(agents) = agents {
        builder = builder.with_agents(agents);
    }
    Harness { runtime: builder.build().expect("runtime should build"), provider, backend }
}

fn harness(provider: ScriptedProvider) -> Harness {
    harness_with(AppConfig::default(), provider, None)
}

fn inbound(conversation: &str, text: &str) -> InboundMessage {
    InboundMessage::text(IDENTITY, conversation, text)
}

fn replied(outcome: HandlerOutcome) -> switchboard_agent::AgentResponse {
    match outcome {
        HandlerOutcome::Replied(response) => response,
        other => panic!("expected a reply, got {other:?}"),
    }
}

// ── Rate limiting ────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_sixth_request_in_window_is_rejected_without_llm_work() {
    let mut config = AppConfig::default();
    config.rate_limit = RateLimitConfig { max_requests: 5, ..RateLimitConfig::default() };
    let responses = (0..6).map(|i| text_response(&format!("reply {i}"))).collect();
    let h = harness_with(config, ScriptedProvider::new(responses), None);
    let now = Utc::now();

    for i in 0..5 {
        let outcome = h.runtime.handler.handle_at(inbound("conv-rl", "hello"), now).await;
        assert!(matches!(outcome, HandlerOutcome::Replied(_)), "request {i} should pass");
    }
    let calls_before = h.provider.call_count();

    let outcome = h.runtime.handler.handle_at(inbound("conv-rl", "hello"), now).await;
    let HandlerOutcome::Rejected { decision, message } = outcome else {
        panic!("sixth request should be rejected")
    };
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
    assert!(decision.retry_after_secs.is_some());
    assert!(!message.is_empty());

    assert_eq!(h.provider.call_count(), calls_before, "rejected request reached the LLM");
    assert!(h.backend.calls().is_empty());
    assert_eq!(h.runtime.metrics.snapshot().total_requests, 5);
    assert_eq!(h.runtime.limiter.violations(IDENTITY), 1);
}

#[tokio::test]
async fn e2e_blacklisted_identity_gets_suspension_notice() {
    let mut config = AppConfig::default();
    config.rate_limit = RateLimitConfig {
        max_requests: 1,
        blacklist_threshold: 2,
        ..RateLimitConfig::default()
    };
    let h = harness_with(config, ScriptedProvider::single_text("hi there"), None);
    let now = Utc::now();

    replied(h.runtime.handler.handle_at(inbound("conv-bl", "hello"), now).await);
    h.runtime.handler.handle_at(inbound("conv-bl", "hello"), now).await;
    let outcome = h.runtime.handler.handle_at(inbound("conv-bl", "hello"), now).await;

    let HandlerOutcome::Rejected { decision, message } = outcome else {
        panic!("expected rejection")
    };
    assert!(decision.blacklisted);
    assert!(message.contains("suspended"));
    assert!(h.runtime.limiter.is_blacklisted(IDENTITY, now));
    assert_eq!(h.provider.call_count(), 1);
}

// ── Classification ───────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_custom_trigger_routes_with_keyword_confidence() {
    let mut agents = AgentRegistry::new();
    for def in default_agents() {
        let def =
            if def.agent_type == AgentType::Booking { def.with_triggers(&["ride"]) } else { def };
        agents.register(def).unwrap();
    }
    let h = harness_with(
        AppConfig::default(),
        ScriptedProvider::single_text("Where are you now?"),
        Some(agents),
    );

    let response =
        replied(h.runtime.handler.handle(inbound("conv-ride", "book a ride to downtown")).await);
    assert_eq!(response.agent_type, AgentType::Booking);
    assert_eq!(response.confidence, Some(0.9));
    // Keyword routing makes no classification call.
    assert_eq!(h.provider.call_count(), 1);
}

#[tokio::test]
async fn e2e_affinity_keeps_follow_ups_with_the_same_agent() {
    let h = harness(ScriptedProvider::new(vec![
        text_response("Which day would you like to travel?"),
        text_response("Tomorrow at 9 works. How many passengers?"),
    ]));

    let first =
        replied(h.runtime.handler.handle(inbound("conv-aff", "I want to book a trip")).await);
    assert_eq!(first.agent_type, AgentType::Booking);

    let second = replied(h.runtime.handler.handle(inbound("conv-aff", "tomorrow at 9")).await);
    assert_eq!(second.agent_type, AgentType::Booking);
    assert_eq!(second.confidence, Some(0.7));
    assert_eq!(h.provider.call_count(), 2);

    h.runtime.orchestrator.end_conversation(&ConversationId::from("conv-aff")).await.unwrap();
    h.provider.push(Ok(text_response("general")));
    h.provider.push(Ok(text_response("Anything else?")));
    let third = replied(h.runtime.handler.handle(inbound("conv-aff", "tomorrow at 9")).await);
    assert_eq!(third.agent_type, AgentType::General);
    assert_eq!(third.confidence, Some(0.8));
}

#[tokio::test]
async fn e2e_unparseable_classification_uses_fallback_agent() {
    let h = harness(ScriptedProvider::new(vec![
        text_response("I think this is about the weather"),
        text_response("Happy to help with that."),
    ]));

    let response = replied(h.runtime.handler.handle(inbound("conv-fb", "umbrella")).await);
    assert_eq!(response.agent_type, AgentType::General);
    assert_eq!(response.confidence, Some(0.5));
}

// ── Tool-calling loop ────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_two_tool_calls_reach_the_backend() {
    let h = harness(ScriptedProvider::new(vec![
        tool_call_response(vec![
            tool_call("get_wallet_balance", json!({})),
            tool_call("get_transaction_history", json!({ "limit": 2 })),
        ]),
        text_response("Your balance is 1200 RWF. Last moves: -500, +2000."),
    ]));

    let message = inbound("conv-wallet", "my wallet balance please");
    let response = replied(h.runtime.handler.handle(message).await);

    assert_eq!(response.agent_type, AgentType::Wallet);
    assert_eq!(response.tool_calls_executed, 2);
    assert_eq!(response.tools_used, ["get_wallet_balance", "get_transaction_history"]);
    assert_eq!(response.tokens_used, 30);
    assert_eq!(h.backend.calls(), ["get_wallet_balance", "get_transaction_history"]);

    let second = &h.provider.requests()[1];
    let results: Vec<_> = second.messages.iter().filter(|m| m.tool_call_id.is_some()).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].content.contains("1200"));
    assert!(results[0].content.contains(IDENTITY));

    let snapshot = h.runtime.metrics.snapshot();
    assert_eq!(snapshot.tool_executions, 2);
    assert_eq!(snapshot.by_tool["get_wallet_balance"], 1);
}

#[tokio::test]
async fn e2e_tool_loop_terminates_at_the_bound() {
    let looping = (0..20)
        .map(|_| tool_call_response(vec![tool_call("get_wallet_balance", json!({}))]))
        .collect();
    let h = harness(ScriptedProvider::new(looping));

    let response = replied(h.runtime.handler.handle(inbound("conv-loop", "wallet")).await);
    assert_eq!(h.provider.call_count(), 6);
    assert_eq!(response.tool_calls_executed, 5);
    assert_eq!(response.text, APOLOGY_TEXT);
}

#[tokio::test]
async fn e2e_missing_required_argument_is_fed_back() {
    let h = harness(ScriptedProvider::new(vec![
        tool_call_response(vec![tool_call("search_routes", json!({ "origin": "Kigali" }))]),
        text_response("Where would you like to go?"),
    ]));

    let response =
        replied(h.runtime.handler.handle(inbound("conv-route", "bus from kigali")).await);
    assert_eq!(response.tool_calls_executed, 0);
    assert!(h.backend.calls().is_empty());
    let result = h.provider.requests()[1].messages.last().unwrap().content.clone();
    assert!(result.contains("destination"));
}

// ── Templates, memory and failures ───────────────────────────────────────

#[tokio::test]
async fn e2e_template_delivery_for_french_caller() {
    let mut config = AppConfig::default();
    config.templates.entries = vec![TemplateEntryConfig {
        agent_type: AgentType::Booking,
        locale: "fr".into(),
        template_key: "booking_reply_fr".into(),
        placeholders: vec!["name".into(), "message_body".into()],
    }];
    let h = harness_with(config, ScriptedProvider::single_text("Votre place est réservée."), None);

    let mut session = switchboard_core::SessionRecord::new(ConversationId::from("conv-tpl"));
    session.locale = Some("fr-RW".into());
    h.runtime.sessions.save(session).await.unwrap();

    let response = replied(h.runtime.handler.handle(inbound("conv-tpl", "réserver un taxi")).await);
    match response.delivery() {
        Delivery::Template { template, parameters, fallback_text } => {
            assert_eq!(template.template_key, "booking_reply_fr");
            assert_eq!(parameters[0].1, "Customer");
            assert_eq!(parameters[1].1, "Votre place est réservée.");
            assert_eq!(fallback_text, response.text);
        }
        other => panic!("expected template delivery, got {other:?}"),
    }
}

#[tokio::test]
async fn e2e_history_and_session_data_carry_over() {
    let h = harness(ScriptedProvider::new(vec![
        text_response("Hello Aline!"),
        text_response("Yes, I remember."),
    ]));

    replied(h.runtime.handler.handle(inbound("conv-mem", "hello, I'm Aline")).await);
    replied(h.runtime.handler.handle(inbound("conv-mem", "hello again, remember me?")).await);

    let second = &h.provider.requests()[1];
    assert!(second.messages.iter().any(|m| m.content == "Hello Aline!"));

    let session = h.runtime.sessions.load(&ConversationId::from("conv-mem")).await.unwrap().unwrap();
    assert_eq!(session.data["last_agent"], "customer_service");

    let summary = h.runtime.memory.conversation_summary(IDENTITY).await.unwrap();
    assert_eq!(summary.total_interactions, 2);
}

#[tokio::test]
async fn e2e_provider_outage_returns_reference_not_internals() {
    let h = harness(ScriptedProvider::with_outcomes(vec![Err(ProviderError::Network(
        "dns error: api.internal.example".into(),
    ))]));
    let msg = inbound("conv-down", "hello");
    let correlation_id = msg.correlation_id.clone();

    let outcome = h.runtime.handler.handle(msg).await;
    let HandlerOutcome::Failed { message, correlation_id: reported } = outcome else {
        panic!("expected failure")
    };

    assert_eq!(reported, correlation_id);
    assert!(message.contains(&correlation_id));
    assert!(!message.contains("dns error"));

    let snapshot = h.runtime.metrics.snapshot();
    assert_eq!(snapshot.failed_requests, 1);
}
