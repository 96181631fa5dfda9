//! `switchboard chat`: single-message or interactive chat.

use std::io::Write;
use std::sync::Arc;
use switchboard_agent::{HandlerOutcome, Runtime, pricing_from_config};
use switchboard_config::AppConfig;
use switchboard_core::message::InboundMessage;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    identity: String,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    SWITCHBOARD_API_KEY=sk-...");
        eprintln!("    OPENAI_API_KEY=sk-...");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let pricing = Arc::new(pricing_from_config(&config));
    let provider = switchboard_providers::build_from_config(&config.llm, pricing)?;
    let runtime = Runtime::builder(config.clone(), provider).build()?;
    let _sweeper = runtime.spawn_sweeper();

    // One conversation per CLI session.
    let conversation_id = uuid::Uuid::new_v4().to_string();

    if let Some(text) = message {
        let outcome =
            runtime.handler.handle(InboundMessage::text(&identity, &conversation_id, text)).await;
        print_outcome(&outcome, json)?;
        return Ok(());
    }

    println!();
    println!("  Switchboard interactive chat");
    println!();
    println!("  Model:     {}", config.llm.model);
    let agents: Vec<&str> =
        runtime.orchestrator.agents().iter().map(|a| a.agent_type.as_str()).collect();
    println!("  Agents:    {}", agents.join(", "));
    println!("  Identity:  {identity}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '/end' to reset the agent, 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        match text {
            "" => {}
            "exit" | "quit" => break,
            "/end" => {
                runtime.orchestrator.end_conversation(&switchboard_core::message::ConversationId::from(&conversation_id)).await?;
                println!("  (conversation reset)");
            }
            _ => {
                let inbound = InboundMessage::text(&identity, &conversation_id, text);
                let outcome = runtime.handler.handle(inbound).await;
                print_outcome(&outcome, json)?;
            }
        }
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_outcome(outcome: &HandlerOutcome, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let value = match outcome {
            HandlerOutcome::Replied(response) => serde_json::to_value(response)?,
            HandlerOutcome::Rejected { decision, message } => {
                serde_json::json!({ "rejected": decision, "message": message })
            }
            HandlerOutcome::Failed { message, correlation_id } => {
                serde_json::json!({
                    "failed": true,
                    "message": message,
                    "correlation_id": correlation_id
                })
            }
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match outcome {
        HandlerOutcome::Replied(response) => {
            let confidence = response.confidence.unwrap_or_default();
            println!();
            for line in response.text.lines() {
                println!("  {} > {line}", response.agent_type);
            }
            let delivery = response.delivery();
            if let Some(template) = delivery.template() {
                println!("  [template {} ({})]", template.template_key, template.locale);
            }
            println!(
                "  [{:.2} confidence, {} tokens, ${:.5}, {} ms, {} tool calls]",
                confidence,
                response.tokens_used,
                response.cost_usd,
                response.latency_ms,
                response.tool_calls_executed

            );
            println!();
        }
        HandlerOutcome::Rejected { message, .. } | HandlerOutcome::Failed { message, .. } => {
            println!();
            println!("  {message}");
            println!();
        }
    }
    Ok(())
}
