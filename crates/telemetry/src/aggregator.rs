//! Rolling request metrics bucketed by minute.
//!
//! Samples are folded into running totals and into the bucket for the
//! minute they were recorded in; the sample itself is not kept. Latency
//! is tracked with a fixed histogram so percentiles can be read from any
//! range of buckets.

use crate::model::*;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::warn;

/// Upper bounds (inclusive, ms) of the latency histogram. One overflow
/// slot follows the last bound.
pub const LATENCY_BOUNDS_MS: [u64; 10] =
    [100, 250, 500, 1000, 2000, 3000, 5000, 10_000, 30_000, 60_000];

const HISTOGRAM_SLOTS: usize = LATENCY_BOUNDS_MS.len() + 1;

/// Thresholds that raise a `MetricAlert`.
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub latency_ms: u64,
    pub cost_usd: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self { latency_ms: 3000, cost_usd: 0.10 }
    }
}

#[derive(Debug, Default, Clone)]
struct AgentCounters {
    requests: u64,
    successes: u64,
    tokens: u64,
    cost_usd: f64,
    latency_sum_ms: u64,
}

impl AgentCounters {
    fn add(&mut self, sample: &MetricSample) {
        self.requests += 1;
        if sample.success {
            self.successes += 1;
        }
        self.tokens += u64::from(sample.tokens);
        self.cost_usd += sample.cost_usd;
        self.latency_sum_ms += sample.latency_ms;
    }

    fn merge(&mut self, other: &AgentCounters) {
        self.requests += other.requests;
        self.successes += other.successes;
        self.tokens += other.tokens;
        self.cost_usd += other.cost_usd;
        self.latency_sum_ms += other.latency_sum_ms;
    }

    fn to_stats(&self) -> AgentStats {
        AgentStats {
            requests: self.requests,
            successes: self.successes,
            tokens: self.tokens,
            cost_usd: self.cost_usd,
            avg_latency_ms: ratio(self.latency_sum_ms as f64, self.requests),
        }
    }
}

#[derive(Debug, Clone)]
struct MinuteBucket {
    requests: u64,
    successes: u64,
    tokens: u64,
    cost_usd: f64,
    latency_sum_ms: u64,
    latency_max_ms: u64,
    histogram: [u64; HISTOGRAM_SLOTS],
    by_agent: HashMap<String, AgentCounters>,
}

impl Default for MinuteBucket {
    fn default() -> Self {
        Self {
            requests: 0,
            successes: 0,
            tokens: 0,
            cost_usd: 0.0,
            latency_sum_ms: 0,
            latency_max_ms: 0,
            histogram: [0; HISTOGRAM_SLOTS],
            by_agent: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct RunningTotals {
    requests: u64,
    successes: u64,
    tokens: u64,
    cost_usd: f64,
    latency_sum_ms: u64,
    latency_min_ms: Option<u64>,
    latency_max_ms: u64,
    tool_executions: u64,
    by_agent: HashMap<String, AgentCounters>,
    by_tool: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct AggregatorState {
    totals: RunningTotals,
    /// minute index since the epoch → bucket
    buckets: BTreeMap<i64, MinuteBucket>,
}

fn ratio(numerator: f64, denominator: u64) -> f64 {
    if denominator == 0 { 0.0 } else { numerator / denominator as f64 }
}

fn minute_of(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

fn minute_start(minute: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(minute * 60, 0).single().unwrap_or_else(Utc::now)
}

fn histogram_slot(latency_ms: u64) -> usize {
    LATENCY_BOUNDS_MS
        .iter()
        .position(|bound| latency_ms <= *bound)
        .unwrap_or(LATENCY_BOUNDS_MS.len())
}

/// Read a percentile (`0.0..=1.0`) from a histogram.
///
/// Returns the upper bound of the slot holding the ranked sample, or
/// `overflow_max` when it falls past the last bound.
fn percentile(histogram: &[u64; HISTOGRAM_SLOTS], p: f64, overflow_max: u64) -> u64 {
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let rank = ((p * total as f64).ceil() as u64).clamp(1, total);
    let mut seen = 0u64;
    for (slot, count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= rank {
            return LATENCY_BOUNDS_MS.get(slot).copied().unwrap_or(overflow_max);
        }
    }
    overflow_max
}

/// Thread-safe metrics aggregator.
pub struct MetricsAggregator {
    thresholds: AlertThresholds,
    retention_minutes: i64,
    state: RwLock<AggregatorState>,
}

impl MetricsAggregator {
    pub fn new(thresholds: AlertThresholds, retention_minutes: u32) -> Self {
        Self {
            thresholds,
            retention_minutes: i64::from(retention_minutes.max(60)),
            state: RwLock::new(AggregatorState::default()),
        }
    }

    /// Fold a sample into the totals and the bucket for `now`.
    ///
    /// Threshold breaches are logged and returned.
    pub fn record(&self, sample: &MetricSample, now: DateTime<Utc>) -> Vec<MetricAlert> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());

            let totals = &mut state.totals;
            totals.requests += 1;
            if sample.success {
                totals.successes += 1;
            }
            totals.tokens += u64::from(sample.tokens);
            totals.cost_usd += sample.cost_usd;
            totals.latency_sum_ms += sample.latency_ms;
            totals.latency_min_ms = Some(match totals.latency_min_ms {
                Some(min) => min.min(sample.latency_ms),
                None => sample.latency_ms,
            });
            totals.latency_max_ms = totals.latency_max_ms.max(sample.latency_ms);
            totals.tool_executions += sample.tools_used.len() as u64;
            totals.by_agent.entry(sample.agent_type.clone()).or_default().add(sample);
            for tool in &sample.tools_used {
                *totals.by_tool.entry(tool.clone()).or_default() += 1;
            }

            let minute = minute_of(now);
            let bucket = state.buckets.entry(minute).or_default();
            bucket.requests += 1;
            if sample.success {
                bucket.successes += 1;
            }
            bucket.tokens += u64::from(sample.tokens);
            bucket.cost_usd += sample.cost_usd;
            bucket.latency_sum_ms += sample.latency_ms;
            bucket.latency_max_ms = bucket.latency_max_ms.max(sample.latency_ms);
            bucket.histogram[histogram_slot(sample.latency_ms)] += 1;
            bucket.by_agent.entry(sample.agent_type.clone()).or_default().add(sample);

            let cutoff = minute - self.retention_minutes;
            state.buckets.retain(|m, _| *m > cutoff);
        }

        let alerts = self.alerts_for(sample);
        for alert in &alerts {
            warn!(
                event = "AGENT_ALERT",
                agent_type = %sample.agent_type,
                alert = %alert,
                "Metric threshold breached"
            );
        }
        alerts
    }

    fn alerts_for(&self, sample: &MetricSample) -> Vec<MetricAlert> {
        let mut alerts = Vec::new();
        if sample.latency_ms > self.thresholds.latency_ms {
            alerts.push(MetricAlert::HighLatency {
                agent_type: sample.agent_type.clone(),
                latency_ms: sample.latency_ms,
                threshold_ms: self.thresholds.latency_ms,
            });
        }
        if sample.cost_usd > self.thresholds.cost_usd {
            alerts.push(MetricAlert::HighCost {
                agent_type: sample.agent_type.clone(),
                cost_usd: sample.cost_usd,
                threshold_usd: self.thresholds.cost_usd,
            });
        }
        if !sample.success {
            alerts.push(MetricAlert::RequestFailed {
                agent_type: sample.agent_type.clone(),
                error: sample.error.clone(),
            });
        }
        alerts
    }

    /// Totals since startup.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let t = &state.totals;
        MetricsSnapshot {
            total_requests: t.requests,
            successful_requests: t.successes,
            failed_requests: t.requests - t.successes,
            success_rate: ratio(t.successes as f64, t.requests),
            total_tokens: t.tokens,
            total_cost_usd: t.cost_usd,
            avg_latency_ms: ratio(t.latency_sum_ms as f64, t.requests),
            min_latency_ms: t.latency_min_ms.unwrap_or(0),
            max_latency_ms: t.latency_max_ms,
            avg_cost_usd: ratio(t.cost_usd, t.requests),
            tool_executions: t.tool_executions,
            by_agent: t.by_agent.iter().map(|(k, v)| (k.clone(), v.to_stats())).collect(),
            by_tool: t.by_tool.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Aggregate the 60 minute buckets ending with the one containing `now`.
    pub fn hourly_rollup(&self, now: DateTime<Utc>) -> HourlyRollup {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let end_minute = minute_of(now);
        let start_minute = end_minute - 59;

        let mut requests = 0u64;
        let mut successes = 0u64;
        let mut tokens = 0u64;
        let mut cost_usd = 0.0;
        let mut latency_sum_ms = 0u64;
        let mut latency_max_ms = 0u64;
        let mut histogram = [0u64; HISTOGRAM_SLOTS];
        let mut by_agent: HashMap<String, AgentCounters> = HashMap::new();

        for (_, bucket) in state.buckets.range(start_minute..=end_minute) {
            requests += bucket.requests;
            successes += bucket.successes;
            tokens += bucket.tokens;
            cost_usd += bucket.cost_usd;
            latency_sum_ms += bucket.latency_sum_ms;
            latency_max_ms = latency_max_ms.max(bucket.latency_max_ms);
            for (slot, count) in bucket.histogram.iter().enumerate() {
                histogram[slot] += count;
            }
            for (agent, counters) in &bucket.by_agent {
                by_agent.entry(agent.clone()).or_default().merge(counters);
            }
        }

        let success_rate = ratio(successes as f64, requests);
        HourlyRollup {
            window_start: minute_start(start_minute),
            window_end: minute_start(end_minute + 1),
            requests,
            success_rate,
            error_rate: if requests == 0 { 0.0 } else { 1.0 - success_rate },
            total_tokens: tokens,
            total_cost_usd: cost_usd,
            avg_latency_ms: ratio(latency_sum_ms as f64, requests),
            p50_latency_ms: percentile(&histogram, 0.50, latency_max_ms),
            p95_latency_ms: percentile(&histogram, 0.95, latency_max_ms),
            p99_latency_ms: percentile(&histogram, 0.99, latency_max_ms),
            by_agent: by_agent.iter().map(|(k, v)| (k.clone(), v.to_stats())).collect(),
        }
    }

    /// Drop buckets older than the retention window. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let cutoff = minute_of(now) - self.retention_minutes;
        let before = state.buckets.len();
        state.buckets.retain(|m, _| *m > cutoff);
        before - state.buckets.len()
    }

    /// Number of minute buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).buckets.len()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(AlertThresholds::default(), 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn snapshot_tracks_totals() {
        let agg = MetricsAggregator::default();
        agg.record(
            &MetricSample::success("booking", 300, 0.002, 800)
                .with_tools(vec!["search_routes".into(), "book_trip".into()]),
            t0(),
        );
        agg.record(&MetricSample::success("wallet", 100, 0.001, 400), t0());
        agg.record(&MetricSample::failure("booking", 1200), t0());

        let snap = agg.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.successful_requests, 2);
        assert_eq!(snap.failed_requests, 1);
        assert!((snap.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.total_tokens, 400);
        assert!((snap.total_cost_usd - 0.003).abs() < 1e-12);
        assert_eq!(snap.min_latency_ms, 400);
        assert_eq!(snap.max_latency_ms, 1200);
        assert!((snap.avg_latency_ms - 800.0).abs() < 1e-9);
        assert_eq!(snap.tool_executions, 2);
        assert_eq!(snap.by_tool["book_trip"], 1);
        assert_eq!(snap.by_agent["booking"].requests, 2);
        assert_eq!(snap.by_agent["booking"].successes, 1);
    }

    #[test]
    fn empty_aggregator_reports_zeroes() {
        let agg = MetricsAggregator::default();
        let snap = agg.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.success_rate, 0.0);
        let rollup = agg.hourly_rollup(t0());
        assert_eq!(rollup.requests, 0);
        assert_eq!(rollup.p99_latency_ms, 0);
        assert_eq!(rollup.error_rate, 0.0);
    }

    #[test]
    fn samples_land_in_minute_buckets() {
        let agg = MetricsAggregator::default();
        agg.record(&MetricSample::success("general", 10, 0.0, 50), t0());
        agg.record(&MetricSample::success("general", 10, 0.0, 50), t0() + Duration::seconds(59));
        agg.record(&MetricSample::success("general", 10, 0.0, 50), t0() + Duration::seconds(60));
        assert_eq!(agg.bucket_count(), 2);
    }

    #[test]
    fn hourly_rollup_percentiles_and_window() {
        let agg = MetricsAggregator::default();
        let now = t0();
        // 90 fast, 9 medium, 1 slow request spread over the last hour
        for i in 0..90 {
            let at = now - Duration::minutes(i % 50);
            agg.record(&MetricSample::success("booking", 100, 0.001, 80), at);
        }
        for _ in 0..9 {
            agg.record(&MetricSample::success("wallet", 100, 0.001, 1800), now);
        }
        agg.record(&MetricSample::failure("wallet", 45_000), now);
        // Outside the trailing hour
        agg.record(&MetricSample::success("booking", 100, 0.001, 80), now - Duration::minutes(75));

        let rollup = agg.hourly_rollup(now);
        assert_eq!(rollup.requests, 100);
        assert!((rollup.success_rate - 0.99).abs() < 1e-9);
        assert!((rollup.error_rate - 0.01).abs() < 1e-9);
        assert_eq!(rollup.p50_latency_ms, 100);
        assert_eq!(rollup.p95_latency_ms, 2000);
        assert_eq!(rollup.p99_latency_ms, 2000);
        assert_eq!(rollup.by_agent["wallet"].requests, 10);
        assert_eq!(rollup.window_end - rollup.window_start, Duration::minutes(60));
    }

    #[test]
    fn overflow_percentile_uses_observed_max() {
        let agg = MetricsAggregator::default();
        agg.record(&MetricSample::success("general", 1, 0.0, 90_000), t0());
        let rollup = agg.hourly_rollup(t0());
        assert_eq!(rollup.p50_latency_ms, 90_000);
    }

    #[test]
    fn prune_drops_old_buckets() {
        let agg = MetricsAggregator::new(AlertThresholds::default(), 60);
        agg.record(&MetricSample::success("general", 1, 0.0, 10), t0());
        agg.record(&MetricSample::success("general", 1, 0.0, 10), t0() + Duration::minutes(30));
        assert_eq!(agg.bucket_count(), 2);
        assert_eq!(agg.prune(t0() + Duration::minutes(61)), 1);
        assert_eq!(agg.bucket_count(), 1);
        // Totals are unaffected by pruning.
        assert_eq!(agg.snapshot().total_requests, 2);
    }

    #[test]
    fn alerts_raised_for_breaches() {
        let agg = MetricsAggregator::default();
        let ok = agg.record(&MetricSample::success("booking", 100, 0.01, 900), t0());
        assert!(ok.is_empty());

        let alerts = agg.record(&MetricSample::success("booking", 9000, 0.25, 4500), t0());
        assert_eq!(alerts.len(), 2);
        assert!(matches!(alerts[0], MetricAlert::HighLatency { latency_ms: 4500, .. }));
        assert!(matches!(alerts[1], MetricAlert::HighCost { .. }));

        let failed = agg.record(&MetricSample::failure("booking", 100), t0());
        assert_eq!(
            failed,
            vec![MetricAlert::RequestFailed { agent_type: "booking".into(), error: None }]
        );

    }
}
