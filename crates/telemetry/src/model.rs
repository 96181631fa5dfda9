//! Data model for metric samples, snapshots, rollups and alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Samples ───────────────────────────────────────────────────────────────

/// The outcome of one handled request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub success: bool,
    pub tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    /// Agent that handled the request (`"unknown"` when it failed before routing)
    pub agent_type: String,
    /// Names of the tools executed, in call order
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Short failure description; never shown to end users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MetricSample {
    pub fn success(
        agent_type: impl Into<String>,
        tokens: u32,
        cost_usd: f64,
        latency_ms: u64,
    ) -> Self {
        Self {
            success: true,
            tokens,
            cost_usd,
            latency_ms,
            agent_type: agent_type.into(),
            tools_used: Vec::new(),
            error: None,
        }
    }

    /// A failed request. Tokens and cost are recorded as zero.
    pub fn failure(agent_type: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            tokens: 0,
            cost_usd: 0.0,
            latency_ms,
            agent_type: agent_type.into(),
            tools_used: Vec::new(),
            error: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools_used = tools;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ── Reports ───────────────────────────────────────────────────────────────

/// Per-agent counters in a report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub requests: u64,
    pub successes: u64,
    pub tokens: u64,
    pub cost_usd: f64,
    pub avg_latency_ms: f64,
}

/// Point-in-time totals since the aggregator started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub avg_cost_usd: f64,
    pub tool_executions: u64,
    pub by_agent: BTreeMap<String, AgentStats>,
    pub by_tool: BTreeMap<String, u64>,
}

/// Aggregate over the trailing 60 minute buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyRollup {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub requests: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    /// Percentiles are histogram bucket upper bounds
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
    pub by_agent: BTreeMap<String, AgentStats>,
}

// ── Alerts ────────────────────────────────────────────────────────────────

/// A threshold breach raised while recording a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricAlert {
    HighLatency { agent_type: String, latency_ms: u64, threshold_ms: u64 },
    HighCost { agent_type: String, cost_usd: f64, threshold_usd: f64 },
    RequestFailed {
        agent_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl std::fmt::Display for MetricAlert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighLatency { latency_ms, threshold_ms, .. } => {
                write!(f, "high_latency: {latency_ms}ms > {threshold_ms}ms")
            }
            Self::HighCost { cost_usd, threshold_usd, .. } => {
                write!(f, "high_cost: ${cost_usd:.4} > ${threshold_usd:.2}")
            }
            Self::RequestFailed { error: Some(error), .. } => write!(f, "request_failed: {error}"),
            Self::RequestFailed { error: None, .. } => write!(f, "request_failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_sample_zeroes_tokens_and_cost() {
        let s = MetricSample::failure("booking", 1200);
        assert!(!s.success);
        assert_eq!(s.tokens, 0);
        assert_eq!(s.cost_usd, 0.0);
    }

    #[test]
    fn alert_serializes_with_kind_tag() {
        let alert = MetricAlert::RequestFailed { agent_type: "wallet".into(), error: None };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["kind"], "request_failed");
    }

    #[test]
    fn alert_display() {
        let alert = MetricAlert::HighLatency {
            agent_type: "booking".into(),
            latency_ms: 4200,
            threshold_ms: 3000,
        };
        assert_eq!(alert.to_string(), "high_latency: 4200ms > 3000ms");
    }
}
