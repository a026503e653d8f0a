// Telemetry module for structured logging, metrics, and tracing

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "deferred-notify";

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Log levels from `RUST_LOG`, falling back to configuration
/// - Optional OpenTelemetry export when an endpoint is given
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());
    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Shutdown OpenTelemetry tracer provider
///
/// This should be called on graceful shutdown to flush remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus recorder and describe all metrics.
///
/// The returned handle renders the text exposition served on `/metrics`.
#[tracing::instrument(skip_all)]
pub fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!(
        "messages_ingested_total",
        "Messages accepted through ingest"
    );
    describe_counter!(
        "ingest_rejected_total",
        "Ingest batches rejected by validation"
    );
    describe_counter!(
        "deliveries_total",
        "Delivery attempts handed to the notifier, by outcome"
    );
    describe_counter!(
        "drift_resets_total",
        "Reconciliation ticks that rebuilt every timer after drift"
    );
    describe_counter!(
        "persistence_failures_total",
        "Snapshot saves that failed"
    );
    describe_gauge!("pending_messages", "Messages waiting in the store");
    describe_gauge!("active_timers", "Countdown timers currently armed");

    tracing::info!("Prometheus metrics recorder installed");
    Ok(handle)
}

#[inline]
pub fn record_ingest(accepted: usize) {
    counter!("messages_ingested_total").increment(accepted as u64);
}

#[inline]
pub fn record_ingest_rejected() {
    counter!("ingest_rejected_total").increment(1);
}

#[inline]
pub fn record_delivery(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("deliveries_total", "outcome" => outcome).increment(1);
}

#[inline]
pub fn record_drift_reset() {
    counter!("drift_resets_total").increment(1);
}

#[inline]
pub fn record_persistence_failure() {
    counter!("persistence_failures_total").increment(1);
}

/// Update store and timer gauges after a reconciliation tick
#[inline]
pub fn update_scheduler_gauges(pending: usize, active_timers: usize) {
    gauge!("pending_messages").set(pending as f64);
    gauge!("active_timers").set(active_timers as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_installs_once() {
        let _ = init_logging("info", None);
        // A global subscriber is now set, so a second install must fail
        assert!(init_logging("debug", None).is_err());
    }

    #[test]
    fn test_metrics_recording_without_recorder() {
        record_ingest(3);
        record_ingest_rejected();
        record_delivery(true);
        record_delivery(false);
        record_drift_reset();
        record_persistence_failure();
        update_scheduler_gauges(2, 2);
    }
}
