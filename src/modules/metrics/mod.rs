//! Metrics collection utilities.
//!
//! Provides aggregated global and per-host statistics with latency
//! percentiles for observability. Aborts and timeouts are counted as
//! exceptions and kept out of the latency samples.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Aggregated metrics across all hosts.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub exceptions: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            total_requests: 0,
            successes: 0,
            failures: 0,
            exceptions: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Host-scoped metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub host: String,
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub exceptions: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
}

impl HostStats {
    fn from_accumulator(host: &str, acc: &HostAccumulator) -> Self {
        let (avg, p95) = acc.latency_stats();
        Self {
            host: host.to_string(),
            total_requests: acc.total_requests,
            successes: acc.successes,
            failures: acc.failures,
            exceptions: acc.exceptions,
            average_latency: avg,
            p95_latency: p95,
            consecutive_failures: acc.consecutive_failures,
            last_status: acc.last_status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub hosts: Vec<HostStats>,
}

#[derive(Debug)]
struct HostAccumulator {
    total_requests: u64,
    successes: u64,
    failures: u64,
    exceptions: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_status: Option<u16>,
}

impl HostAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            total_requests: 0,
            successes: 0,
            failures: 0,
            exceptions: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_status: None,
        }
    }

    fn record_latency(&mut self, latency: Duration) {
        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    fn latency_stats(&self) -> (Option<Duration>, Option<Duration>) {
        if self.latencies.is_empty() {
            return (None, None);
        }
        let mut samples: Vec<_> = self.latencies.iter().cloned().collect();
        samples.sort_unstable();
        let avg = samples.iter().map(|d| d.as_secs_f64()).sum::<f64>() / samples.len() as f64;
        let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
        let p95 = samples[p95_index];
        (Some(Duration::from_secs_f64(avg)), Some(p95))
    }
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    hosts: HashMap<String, HostAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            hosts: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, host: &str) -> &mut HostAccumulator {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| HostAccumulator::new(self.max_window))
    }

    fn blend_latency(&mut self, latency: Duration) {
        if let Some(avg) = self.global.average_latency {
            let blended = (avg.as_secs_f64() * 0.9) + (latency.as_secs_f64() * 0.1);
            self.global.average_latency = Some(Duration::from_secs_f64(blended));
        } else {
            self.global.average_latency = Some(latency);
        }

        let mut samples: Vec<_> = self
            .hosts
            .values()
            .flat_map(|host| host.latencies.iter())
            .cloned()
            .collect();
        samples.sort_unstable();
        if !samples.is_empty() {
            let idx = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
            self.global.p95_latency = Some(samples[idx]);
        }
    }
}

/// Thread-safe metrics collector fed by the transport's event handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(128))),
        }
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    /// Record a request that completed with a success status.
    pub fn record_success(&self, host: &str, status: u16, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_requests += 1;
        guard.global.successes += 1;
        let acc = guard.accumulator_mut(host);
        acc.total_requests += 1;
        acc.successes += 1;
        acc.consecutive_failures = 0;
        acc.last_status = Some(status);
        acc.record_latency(latency);
        guard.blend_latency(latency);
    }

    /// Record a request the server answered with a failure status.
    pub fn record_failure(&self, host: &str, status: u16, latency: Duration) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_requests += 1;
        guard.global.failures += 1;
        let acc = guard.accumulator_mut(host);
        acc.total_requests += 1;
        acc.failures += 1;
        acc.consecutive_failures = acc.consecutive_failures.saturating_add(1);
        acc.last_status = Some(status);
        acc.record_latency(latency);
        guard.blend_latency(latency);
    }

    /// Record a request that never completed normally. No latency sample is
    /// kept; aborts and timeouts would skew the percentiles.
    pub fn record_exception(&self, host: &str) {
        let mut guard = self.inner.lock().expect("metrics lock poisoned");
        guard.global.total_requests += 1;
        guard.global.exceptions += 1;
        let acc = guard.accumulator_mut(host);
        acc.total_requests += 1;
        acc.exceptions += 1;
        acc.consecutive_failures = acc.consecutive_failures.saturating_add(1);
        acc.last_status = Some(0);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.inner.lock().expect("metrics lock poisoned");
        let hosts = guard
            .hosts
            .iter()
            .map(|(host, acc)| HostStats::from_accumulator(host, acc))
            .collect();
        MetricsSnapshot {
            global: guard.global.clone(),
            hosts,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
