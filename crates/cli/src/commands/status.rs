//! `switchboard status`: show configuration and the agent roster.

use switchboard_agent::AgentRegistry;
use switchboard_config::AppConfig;
use switchboard_security::mask_identity;

pub async fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let agents = AgentRegistry::with_defaults();
    let config_path = AppConfig::config_dir().join("config.toml");

    if json {
        let roster: Vec<_> = agents
            .iter()
            .map(|a| {
                serde_json::json!({
                    "agent_type": a.agent_type,
                    "priority": a.priority,
                    "tools": a.enabled_tools,
                    "triggers": a.triggers,
                })
            })
            .collect();
        let status = serde_json::json!({
            "config_path": config_path.display().to_string(),
            "config_found": config_path.exists(),
            "api_key": config.has_api_key(),
            "model": config.llm.model,
            "classifier_model": config.llm.classifier_model,
            "streaming": config.llm.streaming,
            "rate_limit": config.rate_limit,
            "agents": roster,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Switchboard Status");
    println!("==================");
    println!("  Config dir:    {}", AppConfig::config_dir().display());
    println!("  API URL:       {}", config.llm.api_url);
    println!("  Model:         {}", config.llm.model);
    println!("  Classifier:    {}", config.llm.classifier_model);
    println!("  Streaming:     {}", if config.llm.streaming { "enabled" } else { "disabled" });
    println!(
        "  API key:       {}",
        match &config.llm.api_key {
            Some(key) => mask_identity(key),
            None => "missing".into(),
        }
    );
    println!(
        "  Rate limit:    {} req / {}s (blacklist after {} violations)",
        config.rate_limit.max_requests,
        config.rate_limit.window_secs,
        config.rate_limit.blacklist_threshold

    );
    println!(
        "  History cache: {} (ttl {}s)",
        if config.memory.cache_enabled { "enabled" } else { "disabled" },
        config.memory.cache_ttl_secs
    );
    println!("  Tool rounds:   {}", config.orchestrator.max_tool_iterations);
    println!("  Templates:     {}", config.templates.entries.len());

    println!();
    println!("  Agents (routing order):");
    for agent in agents.iter() {
        println!(
            "    {:<17} priority {:<3} {} tools, {} triggers",
            agent.agent_type.as_str(),
            agent.priority,
            agent.enabled_tools.len(),
            agent.triggers.len()
        );
    }

    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, run `switchboard config init` to create one");
    }

    Ok(())
}
