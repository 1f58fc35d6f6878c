//! OpenTelemetry metrics export.
//!
//! Exports per-(task, bucket) histogram growth to an OTLP collector.
//! Export is opt-in: it is enabled only when
//! `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

use crate::histogram::bucket_bounds;

/// Metric export interval in seconds
const METRIC_EXPORT_INTERVAL_SECS: u64 = 30;

static METRICS: OnceLock<WakeLatMetrics> = OnceLock::new();

/// Global MeterProvider for graceful shutdown
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Do NOT add a _total suffix to Counter names (Prometheus adds it
/// automatically).
pub struct WakeLatMetrics {
    pub wake_to_run_events: Counter<u64>,
}

impl WakeLatMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            wake_to_run_events: meter
                .u64_counter("wake_to_run_events")
                .with_description(
                    "Wake-to-run latency observations, bucketed by log2 nanosecond range",
                )
                .with_unit("events")
                .build(),
        }
    }
}

/// Priority:
/// 1. OTEL_EXPORTER_OTLP_ENDPOINT environment variable
/// 2. If not set, metrics export is disabled (no default fallback)
fn get_otlp_endpoint() -> Option<String> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint)
    }
}

/// Initialize the OTLP metrics pipeline. A no-op when no endpoint is
/// configured.
pub fn init_metrics() -> Result<()> {
    let endpoint = match get_otlp_endpoint() {
        Some(ep) => ep,
        None => {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT not set. Metrics export disabled.");
            return Ok(());
        }
    };

    info!("Initializing OpenTelemetry metrics exporter");
    info!("OTLP endpoint: {}", endpoint);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(METRIC_EXPORT_INTERVAL_SECS))
        .build();

    let resource = Resource::default().merge(&Resource::new(vec![
        KeyValue::new("service.name", "wakelat"),
        KeyValue::new("telemetry.sdk.language", "rust"),
    ]));

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);

    let meter = global::meter("wakelat");
    let _ = METRICS.set(WakeLatMetrics::new(&meter));

    info!("OpenTelemetry metrics initialized successfully");
    Ok(())
}

pub fn metrics() -> Option<&'static WakeLatMetrics> {
    METRICS.get()
}

/// Record growth of one histogram cell since the last readout.
pub fn record_latency_bucket(task_id: u32, comm: &str, bucket: u32, count: u64) {
    if let Some(m) = metrics() {
        let (low_ns, _) = bucket_bounds(bucket);
        let attrs = [
            KeyValue::new("task_id", task_id as i64),
            KeyValue::new("process", comm.to_string()),
            KeyValue::new("bucket", bucket as i64),
            KeyValue::new("bucket_floor_ns", low_ns.min(i64::MAX as u64) as i64),
        ];
        m.wake_to_run_events.add(count, &attrs);
    }
}

/// Flush pending metrics and shut down the MeterProvider.
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        info!("Shutting down OpenTelemetry metrics...");
        if let Err(e) = provider.shutdown() {
            log::warn!("Failed to shutdown MeterProvider: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn endpoint_not_set() {
        unsafe {
            std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        }
        assert!(get_otlp_endpoint().is_none());
    }

    #[test]
    #[serial]
    fn endpoint_empty() {
        unsafe {
            std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "");
        }
        assert!(get_otlp_endpoint().is_none());
        unsafe {
            std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        }
    }

    #[test]
    #[serial]
    fn endpoint_from_env() {
        unsafe {
            std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "http://custom:4317");
        }
        assert_eq!(get_otlp_endpoint(), Some("http://custom:4317".to_string()));
        unsafe {
            std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        }
    }

    #[test]
    #[serial]
    fn endpoint_adds_http_prefix() {
        unsafe {
            std::env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "collector:4317");
        }
        assert_eq!(get_otlp_endpoint(), Some("http://collector:4317".to_string()));
        unsafe {
            std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT");
        }
    }
}
