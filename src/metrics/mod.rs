//! Performance telemetry.
//!
//! [`PerformanceMonitor`] keeps two views of the same samples: small
//! in-process aggregates that back the JSON telemetry snapshot, and a
//! Prometheus registry owned by the monitor for the `/metrics` scrape.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use serde::Serialize;

use crate::clock::SharedClock;

/// Metric name prefix for all exported metrics
const PREFIX: &str = "toolhub";

/// How a single call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Carries the error kind.
    Error(&'static str),
    RateLimited,
    CacheHit,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error(_) => "error",
            Outcome::RateLimited => "rate_limited",
            Outcome::CacheHit => "cache_hit",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OperationAggregate {
    count: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

impl OperationAggregate {
    fn new(duration: Duration) -> Self {
        Self {
            count: 1,
            total: duration,
            min: duration,
            max: duration,
        }
    }

    fn add(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
    }
}

#[derive(Default)]
struct Aggregates {
    total_requests: u64,
    per_operation: BTreeMap<String, OperationAggregate>,
    cache_hits: u64,
    cache_misses: u64,
    rate_limit_hits: u64,
    error_counts: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationStats {
    pub count: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSnapshot {
    pub uptime_secs: f64,
    pub total_requests: u64,
    pub requests_per_second: f64,
    pub per_operation: BTreeMap<String, OperationStats>,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// 0.0 when the cache has not been consulted yet.
    pub cache_hit_ratio: f64,
    pub rate_limit_hits: u64,
    pub error_counts: BTreeMap<String, u64>,
}

/// Handles into the monitor's Prometheus registry.
struct PrometheusMetrics {
    registry: Registry,
    tool_calls_total: CounterVec,
    tool_call_duration_seconds: HistogramVec,
    cache_lookups_total: CounterVec,
    rate_limit_hits_total: Counter,
    errors_total: CounterVec,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    active_sessions: Gauge,
    active_streams: Gauge,
    cache_entries: Gauge,
    connections: Gauge,
}

impl PrometheusMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let tool_calls_total = CounterVec::new(
            Opts::new(format!("{PREFIX}_tool_calls_total"), "Total tool calls by outcome"),
            &["operation", "outcome"],
        )?;
        let tool_call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}_tool_call_duration_seconds"),
                "Tool call duration in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["operation"],
        )?;
        let cache_lookups_total = CounterVec::new(
            Opts::new(format!("{PREFIX}_cache_lookups_total"), "Cache lookups by result"),
            &["result"],
        )?;
        let rate_limit_hits_total = Counter::new(
            format!("{PREFIX}_rate_limit_hits_total"),
            "Calls rejected by the rate limiter",
        )?;
        let errors_total = CounterVec::new(
            Opts::new(format!("{PREFIX}_errors_total"), "Total errors by kind"),
            &["kind"],
        )?;
        let http_requests_total = CounterVec::new(
            Opts::new(
                format!("{PREFIX}_http_requests_total"),
                "Total number of HTTP requests",
            ),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}_http_request_duration_seconds"),
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["method", "path"],
        )?;
        let active_sessions = Gauge::new(
            format!("{PREFIX}_active_sessions"),
            "Number of tracked client sessions",
        )?;
        let active_streams = Gauge::new(
            format!("{PREFIX}_active_streams"),
            "Number of in-flight result streams",
        )?;
        let cache_entries = Gauge::new(
            format!("{PREFIX}_cache_entries"),
            "Number of entries in the result cache",
        )?;
        let connections = Gauge::new(
            format!("{PREFIX}_ws_connections"),
            "Number of open real-time connections",
        )?;

        registry.register(Box::new(tool_calls_total.clone()))?;
        registry.register(Box::new(tool_call_duration_seconds.clone()))?;
        registry.register(Box::new(cache_lookups_total.clone()))?;
        registry.register(Box::new(rate_limit_hits_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(active_streams.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(connections.clone()))?;

        Ok(Self {
            registry,
            tool_calls_total,
            tool_call_duration_seconds,
            cache_lookups_total,
            rate_limit_hits_total,
            errors_total,
            http_requests_total,
            http_request_duration_seconds,
            active_sessions,
            active_streams,
            cache_entries,
            connections,
        })
    }
}

/// Current sizes of the server's registries, pushed into the gauges.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    pub sessions: usize,
    pub streams: usize,
    pub cache_entries: usize,
    pub connections: usize,
}

pub struct PerformanceMonitor {
    started_at: Instant,
    clock: SharedClock,
    aggregates: Mutex<Aggregates>,
    prometheus: PrometheusMetrics,
}

impl PerformanceMonitor {
    pub fn new(clock: SharedClock) -> Result<Self> {
        Ok(Self {
            started_at: clock.now(),
            clock,
            aggregates: Mutex::new(Aggregates::default()),
            prometheus: PrometheusMetrics::new()?,
        })
    }

    fn aggregates(&self) -> MutexGuard<'_, Aggregates> {
        self.aggregates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, operation: &str, duration: Duration, outcome: Outcome) {
        {
            let mut agg = self.aggregates();
            agg.total_requests += 1;
            match agg.per_operation.get_mut(operation) {
                Some(op) => op.add(duration),
                None => {
                    agg.per_operation
                        .insert(operation.to_string(), OperationAggregate::new(duration));
                }
            }
            match outcome {
                Outcome::CacheHit => agg.cache_hits += 1,
                Outcome::RateLimited => agg.rate_limit_hits += 1,
                Outcome::Error(kind) => *agg.error_counts.entry(kind.to_string()).or_default() += 1,
                Outcome::Success => {}
            }
        }

        let metrics = &self.prometheus;
        metrics
            .tool_calls_total
            .with_label_values(&[operation, outcome.label()])
            .inc();
        metrics
            .tool_call_duration_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
        match outcome {
            Outcome::CacheHit => metrics.cache_lookups_total.with_label_values(&["hit"]).inc(),
            Outcome::RateLimited => metrics.rate_limit_hits_total.inc(),
            Outcome::Error(kind) => metrics.errors_total.with_label_values(&[kind]).inc(),
            Outcome::Success => {}
        }
    }

    /// A cache lookup that found nothing; the call itself is recorded separately.
    pub fn record_cache_miss(&self) {
        self.aggregates().cache_misses += 1;
        self.prometheus
            .cache_lookups_total
            .with_label_values(&["miss"])
            .inc();
    }

    /// An error that happened outside a dispatched call (e.g. a stream read).
    pub fn record_error(&self, kind: &'static str) {
        *self.aggregates().error_counts.entry(kind.to_string()).or_default() += 1;
        self.prometheus.errors_total.with_label_values(&[kind]).inc();
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        self.prometheus
            .http_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.prometheus
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration.as_secs_f64());
    }

    pub fn set_gauges(&self, gauges: Gauges) {
        self.prometheus.active_sessions.set(gauges.sessions as f64);
        self.prometheus.active_streams.set(gauges.streams as f64);
        self.prometheus.cache_entries.set(gauges.cache_entries as f64);
        self.prometheus.connections.set(gauges.connections as f64);
    }

    pub fn uptime(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started_at)
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let uptime = self.uptime();
        let agg = self.aggregates();

        let per_operation = agg
            .per_operation
            .iter()
            .map(|(name, op)| {
                (
                    name.clone(),
                    OperationStats {
                        count: op.count,
                        avg_ms: millis(op.total) / op.count as f64,
                        min_ms: millis(op.min),
                        max_ms: millis(op.max),
                    },
                )
            })
            .collect();

        let lookups = agg.cache_hits + agg.cache_misses;
        let uptime_secs = uptime.as_secs_f64();

        PerformanceSnapshot {
            uptime_secs,
            total_requests: agg.total_requests,
            requests_per_second: if uptime_secs > 0.0 {
                agg.total_requests as f64 / uptime_secs
            } else {
                0.0
            },
            per_operation,
            cache_hits: agg.cache_hits,
            cache_misses: agg.cache_misses,
            cache_hit_ratio: if lookups > 0 {
                agg.cache_hits as f64 / lookups as f64
            } else {
                0.0
            },
            rate_limit_hits: agg.rate_limit_hits,
            error_counts: agg.error_counts.clone(),
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&self.prometheus.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
