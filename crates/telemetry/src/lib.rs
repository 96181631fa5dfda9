//! Request metrics and cost accounting for Switchboard.
//!
//! Rolling counters and latency histograms bucketed by minute, served as
//! point-in-time snapshots and hourly rollups, plus a model pricing table
//! used to estimate the USD cost of each LLM call.

pub mod aggregator;
pub mod model;
pub mod pricing;

pub use aggregator::{AlertThresholds, MetricsAggregator};
pub use model::{AgentStats, HourlyRollup, MetricAlert, MetricSample, MetricsSnapshot};
pub use pricing::{ModelPricing, PricingTable};
