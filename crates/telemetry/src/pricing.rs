//! Model prices used to turn token usage into `cost_usd`.
//!
//! Prices are USD per one million tokens. Keys are stored lowercased
//! without a host prefix, so `openai/gpt-4o-mini` and `gpt-4o-mini` name
//! the same entry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
}

impl ModelPricing {
    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self { input_per_m, output_per_m }
    }

    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        let input = f64::from(input_tokens) * self.input_per_m;
        let output = f64::from(output_tokens) * self.output_per_m;
        (input + output) / 1_000_000.0
    }
}

const DEFAULT_PRICES: &[(&str, ModelPricing)] = &[
    ("gpt-4o", ModelPricing::new(2.5, 10.0)),
    ("gpt-4o-mini", ModelPricing::new(0.15, 0.6)),
    ("gpt-4.1", ModelPricing::new(2.0, 8.0)),
    ("gpt-4.1-mini", ModelPricing::new(0.4, 1.6)),
    ("gpt-4.1-nano", ModelPricing::new(0.1, 0.4)),
    ("gpt-3.5-turbo", ModelPricing::new(0.5, 1.5)),
    ("text-embedding-3-small", ModelPricing::new(0.02, 0.0)),
    ("text-embedding-3-large", ModelPricing::new(0.13, 0.0)),
    ("gemini-2.0-flash", ModelPricing::new(0.1, 0.4)),
    ("mistral-small", ModelPricing::new(0.2, 0.6)),
    ("deepseek-v3", ModelPricing::new(0.27, 1.1)),
];

fn normalize(model: &str) -> String {
    let bare = model.rsplit('/').next().unwrap_or(model);
    bare.trim().to_lowercase()
}

/// Shared price list. Overrides from config replace defaults.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    pub fn with_defaults() -> Self {
        let prices =
            DEFAULT_PRICES.iter().map(|(name, price)| ((*name).to_string(), *price)).collect();
        Self { prices: RwLock::new(prices) }
    }

    pub fn empty() -> Self {
        Self { prices: RwLock::new(HashMap::new()) }
    }

    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let key = normalize(&model.into());
        self.prices.write().unwrap_or_else(|e| e.into_inner()).insert(key, pricing);
    }

    /// Price for `model`.
    ///
    /// An exact (prefix-stripped) key wins; otherwise the longest known
    /// name that starts the model id, so dated ids like
    /// `gpt-4o-mini-2024-07-18` resolve to `gpt-4o-mini`.
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let wanted = normalize(model);
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        if let Some(price) = prices.get(&wanted) {
            return Some(*price);
        }
        prices
            .iter()
            .filter(|(key, _)| wanted.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, price)| *price)
    }

    /// Zero for models with no known price.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.lookup(model).map_or(0.0, |p| p.cost(input_tokens, output_tokens))
    }

    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prices.keys().cloned().collect();

        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
