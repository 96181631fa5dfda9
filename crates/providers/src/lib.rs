//! LLM provider implementations for Switchboard.
//!
//! All providers implement the `switchboard_core::Provider` trait.
//! [`build_from_config`] assembles the production stack: an
//! OpenAI-compatible client wrapped in bounded retries.

pub mod mock;
pub mod openai_compat;
pub mod retry;

pub use mock::ScriptedProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryingProvider;

use std::sync::Arc;
use std::time::Duration;
use switchboard_config::LlmConfig;
use switchboard_core::error::ProviderError;
use switchboard_core::provider::Provider;
use switchboard_telemetry::PricingTable;
use tracing::info;

/// Build the configured provider.
///
/// Fails with `NotConfigured` when no API key is available.
pub fn build_from_config(
    config: &LlmConfig,
    pricing: Arc<PricingTable>,
) -> std::result::Result<Arc<dyn Provider>, ProviderError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProviderError::NotConfigured("No API key configured".into()))?;

    let timeout = Duration::from_secs(config.request_timeout_secs);
    let client = OpenAiCompatProvider::new("openai", &config.api_url, api_key, timeout)?
        .with_pricing(pricing);

    info!(
        api_url = %config.api_url,
        model = %config.model,
        max_retries = config.max_retries,
        "Provider configured"
    );

    Ok(Arc::new(
        RetryingProvider::new(Arc::new(client))
            .with_max_retries(config.max_retries)
            .with_base_delay(Duration::from_millis(config.retry_base_delay_ms))
            .with_timeout(timeout),
    ))
}
