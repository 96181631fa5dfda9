//! Intent classification and the tool-calling loop.
//!
//! 1. **Classify**: trigger keywords, then session affinity, then a
//!    closed-label LLM call. Any classification failure routes to the
//!    configured fallback agent.
//! 2. **Process**: system prompt + recent history + the current message go
//!    to the LLM with the agent's tool schemas. Requested tool calls are
//!    executed and their results fed back until the LLM answers in text or
//!    the iteration bound is reached.
//! 3. **Package**: text, usage totals, session data and, when one applies,
//!    an approved template with its derived parameters.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use switchboard_config::AppConfig;
use switchboard_core::error::{AgentError, ProviderError};
use switchboard_core::event::{DomainEvent, EventBus};
use switchboard_core::message::{ConversationId, HistoryTurn, Message, MessageToolCall};
use switchboard_core::provider::{Provider, ProviderRequest, ProviderResponse, collect_stream};
use switchboard_core::session::SessionStore;
use switchboard_core::tool::{NoPersistence, PersistenceHandle, ToolContext, ToolRegistry};
use switchboard_core::{AgentDefinition, AgentType, ConversationContext, Result};
use switchboard_security::mask_identity;
use switchboard_telemetry::PricingTable;
use switchboard_templates::{ApprovedTemplate, Delivery, TemplateInputs, TemplateRegistry};
use tracing::{debug, info, warn};

use crate::registry::AgentRegistry;

/// Sent when the LLM finishes without any text.
pub const APOLOGY_TEXT: &str = "I apologize, I couldn't generate a response.";

const KEYWORD_CONFIDENCE: f32 = 0.9;
const LLM_CONFIDENCE: f32 = 0.8;
const AFFINITY_CONFIDENCE: f32 = 0.7;
const FALLBACK_CONFIDENCE: f32 = 0.5;

const CLASSIFIER_TEMPERATURE: f32 = 0.3;
const CLASSIFIER_MAX_TOKENS: u32 = 50;

const TOPICS: [&str; 7] =
    ["booking", "wallet", "marketplace", "support", "balance", "trip", "payment"];

// ── Results ───────────────────────────────────────────────────────────────

/// How an agent was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    Keyword,
    Affinity,
    Llm,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub agent_type: AgentType,
    pub confidence: f32,
    pub method: ClassificationMethod,
}

/// The outcome of one agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub text: String,
    pub agent_type: AgentType,
    /// Summed over every LLM call of the turn
    pub tokens_used: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    /// Tool calls that completed without error
    pub tool_calls_executed: u32,
    /// Names of the successful tool calls, in execution order
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Classification confidence, set by the caller that classified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_template: Option<ApprovedTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_parameters: Vec<(String, String)>,
    /// Keys to merge back into the conversation's session data
    pub session_data: serde_json::Map<String, Value>,
}

impl AgentResponse {
    /// What to send: the approved template when one resolved, else the text.
    pub fn delivery(&self) -> Delivery {
        match &self.approved_template {
            Some(template) => Delivery::Template {
                template: template.clone(),
                parameters: self.template_parameters.clone(),
                fallback_text: self.text.clone(),
            },
            None => Delivery::Text(self.text.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct TurnTotals {
    tokens: u32,
    cost_usd: f64,
    tool_calls: u32,
    tools_used: Vec<String>,
}

impl TurnTotals {
    fn add(&mut self, response: &ProviderResponse) {
        self.tokens = self.tokens.saturating_add(response.total_tokens());
        self.cost_usd += response.cost_usd;
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────

/// Routes messages to agents and runs their tool-calling loop.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    agents: Arc<AgentRegistry>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<dyn SessionStore>,
    templates: Option<Arc<TemplateRegistry>>,
    pricing: Arc<PricingTable>,
    persistence: Arc<dyn PersistenceHandle>,
    events: Option<Arc<EventBus>>,
    model: String,
    classifier_model: String,
    streaming: bool,
    max_tool_iterations: u32,
    history_window: usize,
    fallback_agent: AgentType,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        agents: Arc<AgentRegistry>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<dyn SessionStore>,
        config: &AppConfig,
    ) -> Self {
        Self {
            provider,
            agents,
            tools,
            sessions,
            templates: None,
            pricing: Arc::new(PricingTable::with_defaults()),
            persistence: Arc::new(NoPersistence),
            events: None,
            model: config.llm.model.clone(),
            classifier_model: config.llm.classifier_model.clone(),
            streaming: config.llm.streaming,
            max_tool_iterations: config.orchestrator.max_tool_iterations.max(1),
            history_window: config.orchestrator.history_window,
            fallback_agent: config.orchestrator.fallback_agent,
        }
    }

    pub fn with_templates(mut self, templates: Arc<TemplateRegistry>) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Pricing used to cost streamed responses, which carry no cost of their own.
    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    /// Persistence handle passed to every tool call.
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceHandle>) -> Self {
        self.persistence = persistence;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }

    // ── Classification ────────────────────────────────────────────────────

    /// Pick the agent for the current message. Never fails.
    pub async fn classify_intent(&self, ctx: &ConversationContext) -> Classification {
        let text = ctx.current_message.to_lowercase();

        for def in self.agents.iter() {
            if let Some(trigger) = def.matching_trigger(&text) {
                debug!(
                    correlation_id = %ctx.correlation_id,
                    agent_type = %def.agent_type,
                    trigger,
                    "Trigger matched"
                );
                return self.selected(
                    ctx,
                    def.agent_type,
                    KEYWORD_CONFIDENCE,
                    ClassificationMethod::Keyword,
                );
            }
        }

        if let Some(agent) = self.assigned_agent(&ctx.conversation_id).await
            && !agent.is_fallback()
            && self.agents.contains(agent)
        {
            return self.selected(ctx, agent, AFFINITY_CONFIDENCE, ClassificationMethod::Affinity);
        }

        match self.classify_with_llm(ctx).await {
            Ok(agent) => self.selected(ctx, agent, LLM_CONFIDENCE, ClassificationMethod::Llm),
            Err(e) => {
                warn!(
                    event = "INTENT_CLASSIFICATION_ERROR",
                    correlation_id = %ctx.correlation_id,
                    fallback = %self.fallback_agent,
                    error = %e,
                    "Classification failed, using fallback agent"
                );
                self.selected(
                    ctx,
                    self.fallback_agent,
                    FALLBACK_CONFIDENCE,
                    ClassificationMethod::Fallback,
                )
            }
        }
    }

    fn selected(
        &self,
        ctx: &ConversationContext,
        agent_type: AgentType,
        confidence: f32,
        method: ClassificationMethod,
    ) -> Classification {
        info!(
            correlation_id = %ctx.correlation_id,
            agent_type = %agent_type,
            confidence,
            method = ?method,
            "Intent classified"
        );
        self.publish(DomainEvent::AgentSelected {
            conversation_id: ctx.conversation_id.to_string(),
            agent_type: agent_type.to_string(),
            confidence,
            timestamp: Utc::now(),
        });
        Classification { agent_type, confidence, method }
    }

    async fn assigned_agent(&self, conversation_id: &ConversationId) -> Option<AgentType> {
        match self.sessions.load(conversation_id).await {
            Ok(record) => record.and_then(|r| r.agent),
            Err(e) => {
                warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Session lookup failed, ignoring affinity"
                );
                None
            }
        }
    }

    async fn classify_with_llm(
        &self,
        ctx: &ConversationContext,
    ) -> std::result::Result<AgentType, ProviderError> {
        let labels: Vec<AgentType> =
            AgentType::ALL.into_iter().filter(|t| self.agents.contains(*t)).collect();
        let messages = vec![
            Message::system(classifier_prompt(&labels)),
            Message::user(format!(
                "Message: \"{}\"\nContext: {}",
                ctx.current_message,
                ctx.session_str("last_topic").unwrap_or("none")
            )),
        ];
        let request = ProviderRequest::new(&self.classifier_model, messages)
            .with_temperature(CLASSIFIER_TEMPERATURE)
            .with_max_tokens(CLASSIFIER_MAX_TOKENS);

        let response = self.provider.complete(request).await?;
        let answer = response.message.content;
        AgentType::parse_label(&answer)
            .ok()
            .filter(|t| labels.contains(t))
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!("unexpected intent label {answer:?}"))
            })
    }

    // ── Processing ────────────────────────────────────────────────────────

    /// Run one turn with `agent_type`.
    ///
    /// An unregistered agent type and an LLM failure that survived the
    /// client's retries are errors. Tool failures are not: they are fed
    /// back to the LLM as error payloads.
    pub async fn process_with_agent(
        &self,
        ctx: &ConversationContext,
        agent_type: AgentType,
    ) -> Result<AgentResponse> {
        let started = Instant::now();
        let def = self
            .agents
            .get(agent_type)
            .ok_or_else(|| AgentError::UnknownAgent(agent_type.to_string()))?;

        info!(
            event = "AGENT_PROCESSING_START",
            correlation_id = %ctx.correlation_id,
            agent_type = %agent_type,
            identity = %mask_identity(&ctx.identity),
            "Processing with agent"
        );

        if let Err(e) = self.sessions.set_agent(&ctx.conversation_id, agent_type).await {
            warn!(
                correlation_id = %ctx.correlation_id,
                error = %e,
                "Failed to record session affinity"
            );
        }

        let mut messages = self.build_messages(def, ctx);
        let request = ProviderRequest::new(&self.model, Vec::new())
            .with_temperature(def.temperature)
            .with_max_tokens(def.max_tokens)
            .with_tools(self.tools.definitions_for(&def.enabled_tools));
        let tool_ctx = self.tool_context(ctx);

        let mut totals = TurnTotals::default();
        let mut last_text = String::new();

        let mut response = self.call_llm(&request, &messages).await?;
        totals.add(&response);
        remember_text(&mut last_text, &response);

        let mut rounds = 0;
        while response.has_tool_calls() {
            if rounds >= self.max_tool_iterations {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    agent_type = %agent_type,
                    rounds,
                    pending = response.message.tool_calls.len(),
                    "Tool iteration bound reached with calls pending"
                );
                break;
            }
            rounds += 1;

            let calls = response.message.tool_calls.clone();
            debug!(
                correlation_id = %ctx.correlation_id,
                round = rounds,
                count = calls.len(),
                "Executing tool calls"
            );
            messages.push(Message::assistant_tool_calls(
                response.message.content.clone(),
                calls.clone(),
            ));
            for call in &calls {
                let result = self.run_tool(def, call, &tool_ctx, &mut totals).await;
                messages.push(Message::tool_result(&call.id, result));
            }

            response = self.call_llm(&request, &messages).await?;
            totals.add(&response);
            remember_text(&mut last_text, &response);
        }

        let text = if last_text.trim().is_empty() { APOLOGY_TEXT.to_string() } else { last_text };

        let mut session_data = serde_json::Map::new();
        session_data.insert("last_agent".into(), json!(agent_type));
        session_data.insert("last_topic".into(), json!(extract_topic(&ctx.current_message)));

        let (approved_template, template_parameters) =
            self.attach_template(ctx, agent_type, &text).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        info!(
            event = "AGENT_PROCESSING_COMPLETE",
            correlation_id = %ctx.correlation_id,
            agent_type = %agent_type,
            tokens = totals.tokens,
            cost_usd = totals.cost_usd,
            latency_ms,
            tool_calls = totals.tool_calls,
            "Agent turn complete"
        );
        self.publish(DomainEvent::ResponseGenerated {
            conversation_id: ctx.conversation_id.to_string(),
            agent_type: agent_type.to_string(),
            tokens_used: totals.tokens,
            cost_usd: totals.cost_usd,
            timestamp: Utc::now(),
        });

        Ok(AgentResponse {
            text,
            agent_type,
            tokens_used: totals.tokens,
            cost_usd: totals.cost_usd,
            latency_ms,
            tool_calls_executed: totals.tool_calls,
            tools_used: totals.tools_used,
            confidence: None,
            approved_template,
            template_parameters,
            session_data,
        })
    }

    /// System prompt with locale directive, the last `history_window`
    /// turns, then the current message.
    fn build_messages(&self, def: &AgentDefinition, ctx: &ConversationContext) -> Vec<Message> {
        let system = format!("{}\n\n{}", def.system_prompt.trim(), locale_directive(&ctx.locale));
        let history = ctx.recent_history(self.history_window);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history.iter().map(HistoryTurn::to_message));
        messages.push(Message::user(ctx.current_message.clone()));
        messages
    }

    fn tool_context(&self, ctx: &ConversationContext) -> ToolContext {
        let tool_ctx = ToolContext::new(ctx.identity.clone(), ctx.correlation_id.clone())
            .with_persistence(self.persistence.clone());
        match &ctx.user_id {
            Some(user_id) => tool_ctx.with_user_id(user_id.clone()),
            None => tool_ctx,
        }
    }

    async fn call_llm(
        &self,
        request: &ProviderRequest,
        messages: &[Message],
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut request = request.clone();
        request.messages = messages.to_vec();

        if !self.streaming {
            return self.provider.complete(request).await;
        }

        request.stream = true;
        let rx = self.provider.stream(request).await?;
        let mut response = collect_stream(&self.model, rx).await?;
        if let Some(usage) = response.usage {
            response.cost_usd = self.pricing.compute_cost(
                &response.model,
                usage.prompt_tokens,
                usage.completion_tokens,
            );
        }
        Ok(response)
    }

    /// Execute one requested call and render its tool-result content.
    async fn run_tool(
        &self,
        def: &AgentDefinition,
        call: &MessageToolCall,
        ctx: &ToolContext,
        totals: &mut TurnTotals,
    ) -> String {
        if !def.enabled_tools.iter().any(|t| *t == call.name) {
            warn!(
                correlation_id = %ctx.correlation_id,
                tool = %call.name,
                agent_type = %def.agent_type,
                "LLM requested a tool the agent does not enable"
            );
            return error_payload(format!("tool '{}' is not available", call.name));
        }

        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    tool = %call.name,
                    error = %e,
                    "Unparseable tool arguments"
                );
                return error_payload(format!("invalid arguments: {e}"));
            }
        };

        let started = Instant::now();
        let result = self.tools.execute(&call.name, arguments, ctx).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match result {
            Ok(value) => {
                debug!(
                    correlation_id = %ctx.correlation_id,
                    tool = %call.name,
                    duration_ms,
                    "Tool succeeded"
                );
                totals.tool_calls += 1;
                totals.tools_used.push(call.name.clone());
                value.to_string()
            }
            Err(e) => {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    tool = %call.name,
                    duration_ms,
                    error = %e,
                    "Tool execution failed"
                );
                error_payload(e.to_string())
            }
        }
    }

    async fn attach_template(
        &self,
        ctx: &ConversationContext,
        agent_type: AgentType,
        text: &str,
    ) -> (Option<ApprovedTemplate>, Vec<(String, String)>) {
        let Some(templates) = &self.templates else {
            return (None, Vec::new());
        };
        let inputs = TemplateInputs {
            response_text: text,
            display_name: ctx.display_name.as_deref(),
            locale: &ctx.locale,
            identity: &ctx.identity,
        };
        match templates.resolve(agent_type, &inputs).await {
            Delivery::Template { template, parameters, .. } => (Some(template), parameters),
            Delivery::Text(_) => (None, Vec::new()),
        }
    }

    // ── Affinity management ───────────────────────────────────────────────

    /// Hand the conversation to another agent for subsequent turns.
    pub async fn transfer_to_agent(
        &self,
        conversation_id: &ConversationId,
        agent_type: AgentType,
    ) -> Result<()> {
        if !self.agents.contains(agent_type) {
            return Err(AgentError::UnknownAgent(agent_type.to_string()).into());
        }
        self.sessions.set_agent(conversation_id, agent_type).await?;
        info!(
            event = "AGENT_TRANSFER",
            conversation_id = %conversation_id,
            new_agent = %agent_type,
            "Conversation transferred"
        );
        Ok(())
    }

    /// Drop the conversation's agent so the next turn is classified afresh.
    pub async fn end_conversation(&self, conversation_id: &ConversationId) -> Result<()> {
        self.sessions.clear_agent(conversation_id).await?;
        info!(
            event = "CONVERSATION_ENDED",
            conversation_id = %conversation_id,
            "Conversation ended"
        );
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

fn remember_text(last_text: &mut String, response: &ProviderResponse) {
    if !response.message.content.trim().is_empty() {
        last_text.clone_from(&response.message.content);
    }
}

fn parse_arguments(raw: &str) -> std::result::Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(raw)
}

fn error_payload(message: impl Into<String>) -> String {
    json!({ "error": message.into() }).to_string()
}

fn label_description(agent_type: AgentType) -> &'static str {
    match agent_type {
        AgentType::CustomerService => "General help, account questions, how-to",
        AgentType::Booking => "Trip booking, routes, schedules, seats",
        AgentType::Wallet => "Balance, transfers, payments, top-ups",
        AgentType::Marketplace => "Shopping, products, orders, delivery",
        AgentType::Support => "Technical issues, complaints, feedback",
        AgentType::General => "Greetings, small talk, unclear intent",
    }
}

fn classifier_prompt(labels: &[AgentType]) -> String {
    let mut prompt = String::from("Classify the user's intent into one of these categories:\n");
    for label in labels {
        prompt.push_str(&format!("- {label}: {}\n", label_description(*label)));
    }
    prompt.push_str("\nRespond with just the category name (e.g., \"booking\").");
    prompt
}

/// Reply-language instruction appended to the system prompt.
pub fn locale_directive(locale: &str) -> &'static str {
    let primary = locale.split(['-', '_']).next().unwrap_or_default().to_ascii_lowercase();
    match primary.as_str() {
        "sw" => "Write your replies fully in Kiswahili unless the user switches back to English.",
        "fr" => "Write your replies in French unless the user switches to another language.",
        "rw" => "Write your replies in Kinyarwanda unless the user switches to another language.",
        _ => "Respond in natural English while mirroring any Kiswahili phrases the user sends.",
    }
}

/// First topic keyword found in `message`, else `"general"`.
pub fn extract_topic(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    TOPICS.into_iter().find(|t| lower.contains(t)).unwrap_or("general")
}
