//! Per-tool call metrics and server health.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

/// Number of recent latencies kept for percentile estimates.
const RECENT_LATENCY_WINDOW: usize = 100;

#[derive(Debug, Default)]
struct ToolMetrics {
    call_count: u64,
    error_count: u64,
    total_latency: f64,
    min_latency: Option<f64>,
    max_latency: Option<f64>,
    recent_latencies: VecDeque<f64>,
}

impl ToolMetrics {
    /// Latency statistics only cover successful calls.
    fn record_call(&mut self, latency: f64, error: bool) {
        self.call_count += 1;
        if error {
            self.error_count += 1;
            return;
        }

        self.total_latency += latency;
        if self.recent_latencies.len() == RECENT_LATENCY_WINDOW {
            self.recent_latencies.pop_front();
        }
        self.recent_latencies.push_back(latency);
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
        self.max_latency = Some(self.max_latency.map_or(latency, |m| m.max(latency)));
    }

    fn stats(&self, name: &str) -> ToolStats {
        let successes = self.call_count - self.error_count;
        let mut stats = ToolStats {
            name: name.to_string(),
            call_count: self.call_count,
            error_count: self.error_count,
            error_rate: ratio(self.error_count, self.call_count),
            avg_latency: None,
            min_latency: None,
            max_latency: None,
            p50_latency: None,
            p95_latency: None,
            p99_latency: None,
        };
        if successes == 0 {
            return stats;
        }

        stats.avg_latency = Some(self.total_latency / successes as f64);
        stats.min_latency = self.min_latency;
        stats.max_latency = self.max_latency;

        let mut sorted: Vec<f64> = self.recent_latencies.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        if n > 0 {
            let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
            stats.p50_latency = Some(sorted[n / 2]);
            stats.p95_latency = Some(at(0.95));
            stats.p99_latency = Some(at(0.99));
        }
        stats
    }
}

/// Statistics for one tool. Latencies are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStats {
    pub name: String,
    pub call_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_latency: Option<f64>,
    pub min_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub p50_latency: Option<f64>,
    pub p95_latency: Option<f64>,
    pub p99_latency: Option<f64>,
}

/// Aggregate server health.
#[derive(Debug, Clone, Serialize)]
pub struct ServerHealth {
    pub uptime_seconds: f64,
    pub total_tool_calls: u64,
    pub total_tool_errors: u64,
    pub error_rate: f64,
    pub tools_tracked: usize,
}

/// Full metrics report.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub server_health: ServerHealth,
    pub tool_metrics: BTreeMap<String, ToolStats>,
}

struct Inner {
    tools: HashMap<String, ToolMetrics>,
    started: Instant,
}

/// Collects tool call counts, errors and latencies.
pub struct MetricsCollector {
    enabled: AtomicBool,
    inner: Mutex<Inner>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create an enabled collector.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            inner: Mutex::new(Inner {
                tools: HashMap::new(),
                started: Instant::now(),
            }),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        info!("Metrics collection enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        info!("Metrics collection disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Record one tool call. Ignored while disabled.
    pub fn record_tool_call(&self, tool_name: &str, latency: Duration, error: bool) {
        if !self.is_enabled() {
            return;
        }
        let mut inner = self.inner.lock();
        inner
            .tools
            .entry(tool_name.to_string())
            .or_default()
            .record_call(latency.as_secs_f64(), error);
    }

    /// Statistics for a single tool, if it has been called.
    pub fn get_tool_metrics(&self, tool_name: &str) -> Option<ToolStats> {
        self.inner.lock().tools.get(tool_name).map(|m| m.stats(tool_name))
    }

    /// Statistics for every tool, keyed by name.
    pub fn all_tool_metrics(&self) -> BTreeMap<String, ToolStats> {
        self.inner
            .lock()
            .tools
            .iter()
            .map(|(name, m)| (name.clone(), m.stats(name)))
            .collect()
    }

    pub fn server_health(&self) -> ServerHealth {
        let inner = self.inner.lock();
        let total_tool_calls = inner.tools.values().map(|m| m.call_count).sum();
        let total_tool_errors = inner.tools.values().map(|m| m.error_count).sum();
        ServerHealth {
            uptime_seconds: inner.started.elapsed().as_secs_f64(),
            total_tool_calls,
            total_tool_errors,
            error_rate: ratio(total_tool_errors, total_tool_calls),
            tools_tracked: inner.tools.len(),
        }
    }

    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            server_health: self.server_health(),
            tool_metrics: self.all_tool_metrics(),
        }
    }

    /// Drop all recorded metrics and restart the uptime clock.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.tools.clear();
        inner.started = Instant::now();
        info!("Metrics reset");
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_record_and_stats() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("echo", ms(100), false);
        metrics.record_tool_call("echo", ms(300), false);
        metrics.record_tool_call("echo", ms(5000), true);

        let stats = metrics.get_tool_metrics("echo").unwrap();
        assert_eq!(stats.call_count, 3);
        assert_eq!(stats.error_count, 1);
        assert!((stats.error_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_latency.unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(stats.min_latency, Some(0.1));
        assert_eq!(stats.max_latency, Some(0.3));
        assert_eq!(stats.p50_latency, Some(0.3));
    }

    #[test]
    fn test_only_errors_have_no_latency() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("broken", ms(10), true);
        let stats = metrics.get_tool_metrics("broken").unwrap();
        assert_eq!(stats.avg_latency, None);
        assert_eq!(stats.p99_latency, None);
        assert_eq!(stats.error_rate, 1.0);
    }

    #[test]
    fn test_percentiles_use_recent_window() {
        let metrics = MetricsCollector::new();
        for i in 1..=200 {
            metrics.record_tool_call("scan", ms(i), false);
        }
        let stats = metrics.get_tool_metrics("scan").unwrap();
        // Only the last 100 calls (101..=200ms) feed percentiles.
        assert_eq!(stats.p50_latency, Some(0.151));
        assert_eq!(stats.p95_latency, Some(0.196));
        assert_eq!(stats.p99_latency, Some(0.2));
        assert_eq!(stats.min_latency, Some(0.001));
    }

    #[test]
    fn test_disabled_collector_ignores_calls() {
        let metrics = MetricsCollector::new();
        metrics.disable();
        metrics.record_tool_call("echo", ms(1), false);
        assert!(metrics.get_tool_metrics("echo").is_none());
        metrics.enable();
        metrics.record_tool_call("echo", ms(1), false);
        assert!(metrics.get_tool_metrics("echo").is_some());
    }

    #[test]
    fn test_server_health_and_reset() {
        let metrics = MetricsCollector::new();
        metrics.record_tool_call("a", ms(1), false);
        metrics.record_tool_call("b", ms(1), true);

        let health = metrics.server_health();
        assert_eq!(health.total_tool_calls, 2);
        assert_eq!(health.total_tool_errors, 1);
        assert_eq!(health.error_rate, 0.5);
        assert_eq!(health.tools_tracked, 2);

        metrics.reset();
        let report = metrics.report();
        assert_eq!(report.server_health.total_tool_calls, 0);
        assert!(report.tool_metrics.is_empty());
    }
}
