//! Engine metrics
//!
//! Counters are kept in a registry owned by each engine so several engines
//! can run side by side in one process.

use influxdb_core::error::{InfluxError, InfluxResult};
use prometheus::{Encoder as _, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::Serialize;
use std::time::Duration;

/// Prometheus metrics describing flush activity
#[derive(Debug, Clone)]
pub struct EngineMetrics {
    registry: Registry,

    pub points_written: IntCounter,
    pub points_dropped: IntCounter,
    pub fields_dropped: IntCounter,
    pub records_acked: IntCounter,
    pub records_failed: IntCounter,

    pub flushes: IntCounter,
    pub flush_failures: IntCounter,
    pub flush_duration: Histogram,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub points_written: u64,
    pub points_dropped: u64,
    pub fields_dropped: u64,
    pub records_acked: u64,
    pub records_failed: u64,
    pub flushes: u64,
    pub flush_failures: u64,
}

impl EngineMetrics {
    pub fn new() -> InfluxResult<Self> {
        let registry = Registry::new();

        let points_written = counter(
            &registry,
            "influxdb_sink_points_written_total",
            "Points accepted by the store",
        )?;
        let points_dropped = counter(
            &registry,
            "influxdb_sink_points_dropped_total",
            "Points discarded before writing (missing or non-finite values)",
        )?;
        let fields_dropped = counter(
            &registry,
            "influxdb_sink_fields_dropped_total",
            "Extra fields left out of a written point",
        )?;
        let records_acked = counter(
            &registry,
            "influxdb_sink_records_acked_total",
            "Records acknowledged upstream",
        )?;
        let records_failed = counter(
            &registry,
            "influxdb_sink_records_failed_total",
            "Records failed upstream",
        )?;
        let flushes = counter(
            &registry,
            "influxdb_sink_flushes_total",
            "Flushes that attempted a write",
        )?;
        let flush_failures = counter(
            &registry,
            "influxdb_sink_flush_failures_total",
            "Flushes whose write or database creation failed",
        )?;

        let flush_duration = Histogram::with_opts(
            HistogramOpts::new(
                "influxdb_sink_flush_duration_seconds",
                "Time spent writing a batch",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(flush_duration.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            registry,
            points_written,
            points_dropped,
            fields_dropped,
            records_acked,
            records_failed,
            flushes,
            flush_failures,
            flush_duration,
        })
    }

    pub fn observe_flush(&self, elapsed: Duration) {
        self.flush_duration.observe(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            points_written: self.points_written.get(),
            points_dropped: self.points_dropped.get(),
            fields_dropped: self.fields_dropped.get(),
            records_acked: self.records_acked.get(),
            records_failed: self.records_failed.get(),
            flushes: self.flushes.get(),
            flush_failures: self.flush_failures.get(),
        }
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn gather_text(&self) -> InfluxResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(registration_error)?;
        String::from_utf8(buffer)
            .map_err(|e| InfluxError::internal(format!("Metrics output is not UTF-8: {}", e)))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> InfluxResult<IntCounter> {
    let counter = IntCounter::new(name, help).map_err(registration_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(registration_error)?;
    Ok(counter)
}

fn registration_error(e: prometheus::Error) -> InfluxError {
    InfluxError::internal(format!("Failed to set up metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let first = EngineMetrics::new().unwrap();
        let second = EngineMetrics::new().unwrap();

        first.points_written.inc_by(3);
        first.records_failed.inc();

        assert_eq!(first.snapshot().points_written, 3);
        assert_eq!(first.snapshot().records_failed, 1);
        assert_eq!(second.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_gather_text() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.flushes.inc();
        metrics.observe_flush(Duration::from_millis(20));

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("influxdb_sink_flushes_total 1"));
        assert!(text.contains("influxdb_sink_flush_duration_seconds_count 1"));
    }
}
