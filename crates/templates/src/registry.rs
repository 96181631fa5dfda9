//! Template lookup with locale fallback.

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use switchboard_config::TemplatesConfig;
use switchboard_core::AgentType;
use tracing::{debug, info, warn};

use crate::derive::{TemplateInputs, derive_parameters};

/// A pre-approved outbound message shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedTemplate {
    pub agent_type: AgentType,
    pub locale: String,
    /// Identifier known to the messaging platform
    pub template_key: String,
    /// Placeholder names, in the order the platform expects values
    pub placeholders: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("No approved template for {agent_type} ({locale})")]
    NotFound { agent_type: AgentType, locale: String },

    #[error("Template '{template_key}' placeholder '{placeholder}' has no value")]
    MissingParameter { template_key: String, placeholder: String },

    #[error("Template source error: {0}")]
    Source(String),
}

/// An external registry of approved templates.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// The template for exactly this agent and locale, if one exists.
    async fn fetch(
        &self,
        agent_type: AgentType,
        locale: &str,
    ) -> Result<Option<ApprovedTemplate>, TemplateError>;
}

/// What to send back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Template {
        template: ApprovedTemplate,
        parameters: Vec<(String, String)>,
        /// Plain reply, for transports that can still send free text
        fallback_text: String,
    },
    Text(String),
}

impl Delivery {
    pub fn text(&self) -> &str {
        match self {
            Self::Template { fallback_text, .. } => fallback_text,
            Self::Text(text) => text,
        }
    }

    pub fn template(&self) -> Option<&ApprovedTemplate> {
        match self {
            Self::Template { template, .. } => Some(template),
            Self::Text(_) => None,
        }
    }
}

type CacheKey = (AgentType, String);

/// Approved templates keyed by agent and locale.
///
/// Config entries are loaded up front and never expire. Lookups that miss
/// them go to the optional [`TemplateSource`]; its answers, including
/// "none", are cached for `cache_ttl_secs` in a bounded cache, so a
/// template approved upstream shows up once the miss expires.
pub struct TemplateRegistry {
    configured: HashMap<CacheKey, ApprovedTemplate>,
    fetched: Cache<CacheKey, Option<ApprovedTemplate>>,
    source: Option<Arc<dyn TemplateSource>>,
    default_locale: String,
    max_body_chars: usize,
}

impl TemplateRegistry {
    pub fn new(config: &TemplatesConfig) -> Self {
        let configured = config
            .entries
            .iter()
            .map(|e| {
                let template = ApprovedTemplate {
                    agent_type: e.agent_type,
                    locale: normalize_locale(&e.locale),
                    template_key: e.template_key.clone(),
                    placeholders: e.placeholders.clone(),
                };
                ((template.agent_type, template.locale.clone()), template)
            })
            .collect();

        let fetched = Cache::builder()
            .max_capacity(config.cache_max_entries)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();

        Self {
            configured,
            fetched,
            source: None,
            default_locale: normalize_locale(&config.default_locale),
            max_body_chars: config.max_body_chars,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn TemplateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Locales tried for `locale`, most specific first, without repeats.
    fn candidates(&self, locale: &str) -> Vec<String> {
        let exact = normalize_locale(locale);
        let mut out = vec![exact.clone()];
        if let Some((primary, _)) = exact.split_once('-') {
            out.push(primary.to_string());
        }
        out.push(self.default_locale.clone());
        let mut seen = Vec::with_capacity(out.len());
        out.retain(|l| {
            let fresh = !seen.contains(l);
            seen.push(l.clone());
            fresh
        });
        out
    }

    async fn lookup(
        &self,
        agent_type: AgentType,
        locale: &str,
    ) -> Result<Option<ApprovedTemplate>, TemplateError> {
        let key = (agent_type, locale.to_string());
        if let Some(template) = self.configured.get(&key) {
            return Ok(Some(template.clone()));
        }
        let Some(source) = &self.source else {
            return Ok(None);
        };
        if let Some(hit) = self.fetched.get(&key).await {
            return Ok(hit);
        }

        let fetched = source.fetch(agent_type, locale).await?;
        debug!(
            agent_type = %agent_type,
            locale,
            found = fetched.is_some(),
            "Template source lookup"
        );
        self.fetched.insert(key, fetched.clone()).await;
        Ok(fetched)
    }

    /// The template for `agent_type`, trying the exact locale, then its
    /// primary subtag (`fr-RW` → `fr`), then the default locale.
    pub async fn get(
        &self,
        agent_type: AgentType,
        locale: &str,
    ) -> Result<ApprovedTemplate, TemplateError> {
        for candidate in self.candidates(locale) {
            if let Some(template) = self.lookup(agent_type, &candidate).await? {
                return Ok(template);
            }
        }
        Err(TemplateError::NotFound { agent_type, locale: locale.to_string() })
    }

    /// Decide between a template and free text for this reply.
    ///
    /// Any failure (no template, a placeholder without a value, a source
    /// error) falls back to the unmodified reply text.
    pub async fn resolve(&self, agent_type: AgentType, inputs: &TemplateInputs<'_>) -> Delivery {
        let resolved = match self.get(agent_type, inputs.locale).await {
            Ok(template) => {
                derive_parameters(&template, inputs, self.max_body_chars).map(|p| (template, p))
            }
            Err(e) => Err(e),
        };

        match resolved {
            Ok((template, parameters)) => {
                debug!(
                    agent_type = %agent_type,
                    template_key = %template.template_key,
                    "Template resolved"
                );
                Delivery::Template {
                    template,
                    parameters,
                    fallback_text: inputs.response_text.to_string(),
                }
            }
            Err(TemplateError::Source(reason)) => {
                warn!(
                    event = "TEMPLATE_FALLBACK",
                    agent_type = %agent_type,
                    locale = inputs.locale,
                    %reason,
                    "Template source failed, sending text"
                );
                Delivery::Text(inputs.response_text.to_string())
            }
            Err(e) => {
                info!(
                    event = "TEMPLATE_FALLBACK",
                    agent_type = %agent_type,
                    locale = inputs.locale,
                    reason = %e,
                    "Sending text"
                );
                Delivery::Text(inputs.response_text.to_string())
            }
        }
    }
}

fn normalize_locale(locale: &str) -> String {
    locale.trim().replace('_', "-").to_lowercase()
}
