//! `switchboard config`: configuration management commands.

use switchboard_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    if let Err(e) = config.validate() {
        println!("   ❌ {e}");
        return Err(e.into());
    }

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set SWITCHBOARD_API_KEY or OPENAI_API_KEY)".to_string());
    }
    if config.rate_limit.blacklist_duration_secs < config.rate_limit.window_secs {
        warnings.push("Blacklist duration is shorter than the rate limit window".to_string());
    }
    for entry in &config.templates.entries {
        if entry.placeholders.is_empty() {
            warnings.push(format!("Template '{}' declares no placeholders", entry.template_key));
        }
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Model:       {}", config.llm.model);
    println!("   Classifier:  {}", config.llm.classifier_model);
    println!("   Fallback:    {}", config.orchestrator.fallback_agent);
    println!("   Templates:   {}", config.templates.entries.len());
    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some("[REDACTED]".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let config_path = dir.join("config.toml");
    if config_path.exists() && !force {
        println!("Config already exists at {} (use --force to overwrite)", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Wrote default config to {}", config_path.display());
    Ok(())
}
