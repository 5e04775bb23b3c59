//! # Telemetry Features
//!
//! Console logging is always on. OpenTelemetry export is opt-in:
//!
//! - `tracing`: export spans from the dispatcher, workers and feed tasks.
//! - `metrics`: export the pipeline counters as observable instruments.
//! - `stdout`: print exported spans and metrics to stdout.
//!
//! `stdout` requires at least one of `tracing` or `metrics`.
//!
//! ## Span behavior
//!
//! - Spans created via `tracing::instrument` are exported when `tracing` is
//!   enabled
//! - Events inside a span become span events in the exporter
//! - Events outside of a span are only shown in log output
//!
//! ## Example usage
//!
//! ```bash
//! cargo run --features tracing,metrics,stdout -- --coordinate-range 8
//! ```

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Meter, ObservableCounter, ObservableGauge};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use shape_collector::PipelineStats;
#[cfg(feature = "metrics")]
use std::sync::{Arc, OnceLock};

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "shape-collector";

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer();

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics();

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Human-readable console output, independent of the stdout exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Flushes and shuts down every exporter. Errors are printed, not returned,
/// because logging may already be gone.
pub fn shutdown_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        if let Err(err) = _providers.tracer_provider.force_flush() {
            eprintln!("Error flushing traces: {err:#?}");
        }
        if let Err(err) = _providers.tracer_provider.shutdown() {
            eprintln!("Error shutting down tracer: {err:#?}");
        }
    }

    #[cfg(feature = "metrics")]
    {
        if let Err(err) = _providers.meter_provider.force_flush() {
            eprintln!("Error flushing metrics: {err:#?}");
        }
        if let Err(err) = _providers.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {err:#?}");
        }
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> sdkmetrics::SdkMeterProvider {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = sdkmetrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    builder.build()
}

#[cfg(feature = "tracing")]
fn init_tracer() -> sdktrace::SdkTracerProvider {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    builder.build()
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static METER: OnceLock<Meter> = OnceLock::new();
#[cfg(feature = "metrics")]
static LOCATIONS_SENT: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static SHAPES_RECEIVED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static PIPELINE_INSTRUMENTS: OnceLock<PipelineInstruments> = OnceLock::new();

/// Observable instruments backed by a pipeline's [`PipelineStats`]. Held for
/// the life of the process so their callbacks stay registered.
#[cfg(feature = "metrics")]
struct PipelineInstruments {
    _counters: Vec<ObservableCounter<u64>>,
    _gauges: Vec<ObservableGauge<u64>>,
}

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = LOCATIONS_SENT.set(
        meter
            .u64_counter("locations_sent")
            .with_description("Locations sent by the random feed")
            .build(),
    );

    let _ = SHAPES_RECEIVED.set(
        meter
            .u64_counter("shapes_received")
            .with_description("Shapes read by the consumer")
            .build(),
    );

    let _ = METER.set(meter);
}

/// Exposes the pipeline counters as observable instruments. Only the first
/// registration takes effect.
#[cfg(feature = "metrics")]
pub fn register_pipeline_metrics(stats: Arc<PipelineStats>) {
    let Some(meter) = METER.get() else {
        return;
    };

    let counter = |name: &'static str, description: &'static str, read: fn(&PipelineStats) -> u64| {
        let stats = Arc::clone(&stats);
        meter
            .u64_observable_counter(name)
            .with_description(description)
            .with_callback(move |observer| observer.observe(read(&stats), &[]))
            .build()
    };
    let gauge = |name: &'static str, description: &'static str, read: fn(&PipelineStats) -> usize| {
        let stats = Arc::clone(&stats);
        meter
            .u64_observable_gauge(name)
            .with_description(description)
            .with_callback(move |observer| observer.observe(read(&stats) as u64, &[]))
            .build()
    };

    let instruments = PipelineInstruments {
        _counters: vec![
            counter("received", "Locations read by the dispatcher", PipelineStats::received),
            counter("duplicates", "Locations dropped as already in flight", PipelineStats::duplicates),
            counter("admitted", "Locations admitted for fetching", PipelineStats::admitted),
            counter("completed", "Completion signals processed", PipelineStats::completed),
            counter("shapes_emitted", "Shapes sent to the consumer", PipelineStats::shapes_emitted),
            counter("fetch_failures", "Fetches that failed or panicked", PipelineStats::fetch_failures),
        ],
        _gauges: vec![
            gauge("in_flight", "Locations currently in flight", PipelineStats::in_flight),
            gauge("active_fetches", "Fetches currently running", PipelineStats::active_fetches),
            gauge(
                "peak_active_fetches",
                "Highest number of concurrent fetches",
                PipelineStats::peak_active_fetches,
            ),
        ],
    };
    let _ = PIPELINE_INSTRUMENTS.set(instruments);
}

#[cfg(not(feature = "metrics"))]
pub fn register_pipeline_metrics(_stats: std::sync::Arc<shape_collector::PipelineStats>) {}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_locations_sent() {
    if let Some(counter) = LOCATIONS_SENT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_locations_sent() {}

#[cfg(feature = "metrics")]
pub fn increment_shapes_received() {
    if let Some(counter) = SHAPES_RECEIVED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_shapes_received() {}
