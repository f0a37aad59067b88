//! # Metrics - CohortKV Observability
//!
//! Components report through the [`MetricsSink`] trait they are handed at
//! construction; nothing here is a process global. [`Metrics`] is the
//! Prometheus-backed sink and owns its own [`Registry`], which
//! [`MetricsEndpoint`] serves in the text exposition format.
//!
//! ```text
//! cohortkv_records_processed_total    counter  devices read by the pipelines
//! cohortkv_processing_seconds_total   counter  wall time spent per file
//! cohortkv_get_latency_seconds        summary  GET latency, p50/p90/p99 over 30s
//! ```
mod http;
mod summary;

use anyhow::{Context, Result};
use prometheus::{Counter, Encoder, IntCounter, Registry, TextEncoder};
use std::time::Duration;

pub use http::MetricsEndpoint;
pub use summary::{
    LatencySummary, SummarySnapshot, DEFAULT_MAX_AGE, DEFAULT_MAX_SAMPLES, DEFAULT_OBJECTIVES,
};

/// Sink for the counters and latencies the pipelines and server emit.
///
/// Implementations must tolerate concurrent calls from many threads.
pub trait MetricsSink: Send + Sync {
    /// Adds `n` to the count of device records processed.
    fn add_records(&self, n: u64);

    /// Adds `elapsed` to the cumulative processing time.
    fn add_processing_time(&self, elapsed: Duration);

    /// Records the latency of one `GET` query.
    fn observe_query_latency(&self, elapsed: Duration);
}

/// Discards everything. Used by offline tools and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn add_records(&self, _n: u64) {}
    fn add_processing_time(&self, _elapsed: Duration) {}
    fn observe_query_latency(&self, _elapsed: Duration) {}
}

/// Prometheus-backed sink with a private registry.
pub struct Metrics {
    registry: Registry,
    records: IntCounter,
    processing: Counter,
    latency: LatencySummary,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("records", &self.records.get())
            .field("processing_seconds", &self.processing.get())
            .field("latency", &self.latency.snapshot())
            .finish()
    }
}

impl Metrics {
    /// Creates and registers every metric.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let records = IntCounter::new(
            "cohortkv_records_processed_total",
            "Device records processed by the ingestion pipelines",
        )?;
        let processing = Counter::new(
            "cohortkv_processing_seconds_total",
            "Cumulative seconds spent processing ingestion files",
        )?;
        let latency = LatencySummary::new(
            "cohortkv_get_latency_seconds",
            "Latency of GET lookups",
            DEFAULT_OBJECTIVES,
            DEFAULT_MAX_AGE,
        )?;

        registry
            .register(Box::new(records.clone()))
            .context("registering records counter")?;
        registry
            .register(Box::new(processing.clone()))
            .context("registering processing counter")?;
        registry
            .register(Box::new(latency.clone()))
            .context("registering latency summary")?;

        Ok(Self {
            registry,
            records,
            processing,
            latency,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn records(&self) -> u64 {
        self.records.get()
    }

    pub fn processing_seconds(&self) -> f64 {
        self.processing.get()
    }

    pub fn latency(&self) -> &LatencySummary {
        &self.latency
    }
}

impl MetricsSink for Metrics {
    fn add_records(&self, n: u64) {
        self.records.inc_by(n);
    }

    fn add_processing_time(&self, elapsed: Duration) {
        self.processing.inc_by(elapsed.as_secs_f64());
    }

    fn observe_query_latency(&self, elapsed: Duration) {
        self.latency.observe(elapsed);
    }
}
