use std::{sync::LazyLock, time::Duration};

use opentelemetry::metrics::Counter;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{Compression, WithExportConfig, WithTonicConfig};
use prometheus::{IntCounter, Registry};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{CARGO_CRATE_NAME, Config};

static RESOURCE: LazyLock<opentelemetry_sdk::Resource> = LazyLock::new(|| {
    opentelemetry_sdk::Resource::builder()
        .with_service_name(CARGO_CRATE_NAME)
        .build()
});

// Prometheus registry and metrics

pub(crate) static PROMETHEUS_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    Registry::new_custom(Some("key_cache".to_string()), None)
        .expect("Failed to create Prometheus registry")
});

static PROM_DISK_HIT: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("disk_hit_total", "Number of disk cache hits").unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_INDEX_HIT: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("index_hit_total", "Number of recency index hits").unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_ORIGIN_FETCH: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("origin_fetch_total", "Number of origin fetches").unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_ORIGIN_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "origin_bytes_total",
        "Total bytes transferred from the origin",
    )
    .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_ORIGIN_FETCH_ERROR: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("origin_fetch_error_total", "Number of failed origin fetches")
        .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_PROMOTION_ERROR: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "promotion_error_total",
        "Number of failures moving fetched keys into the cache tree",
    )
    .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_EVICTION: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new("eviction_total", "Number of byte-budget evictions").unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

static PROM_STALE_REFRESH: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "stale_refresh_total",
        "Number of stale entries evicted on mutable-bucket requests",
    )
    .unwrap();
    PROMETHEUS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

pub(crate) fn initialize_telemetry(
    config: &Config,
) -> crate::Result<(
    opentelemetry_sdk::metrics::SdkMeterProvider,
    Option<opentelemetry_sdk::logs::SdkLoggerProvider>,
)> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let logs_provider = init_logs(config.otel_grpc_endpoint_url.as_deref())?;

    match logs_provider.as_ref() {
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        Some(logs_provider) => {
            let otel_layer = OpenTelemetryTracingBridge::new(logs_provider);
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .with(otel_layer)
                .init();
        }
    }

    let metrics_provider = init_metrics(config.otel_grpc_endpoint_url.as_deref())?;

    Ok((metrics_provider, logs_provider))
}

fn init_logs(
    otel_grpc_endpoint_url: Option<&str>,
) -> crate::Result<Option<opentelemetry_sdk::logs::SdkLoggerProvider>> {
    let builder = opentelemetry_sdk::logs::SdkLoggerProvider::builder();

    let Some(otel_grpc_endpoint_url) = otel_grpc_endpoint_url else {
        return Ok(None);
    };

    let otlp_exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_compression(Compression::Gzip)
        .with_endpoint(otel_grpc_endpoint_url)
        .with_timeout(Duration::from_secs(5))
        .build()?;

    let provider = builder.with_batch_exporter(otlp_exporter).build();

    Ok(Some(provider))
}

pub(crate) fn shutdown_logs(logs_provider: Option<opentelemetry_sdk::logs::SdkLoggerProvider>) {
    let Some(logs_provider) = logs_provider else {
        return;
    };

    if let Err(error) = logs_provider.shutdown() {
        error!("Error during logs shutdown: {error:?}");
    }
}

fn init_metrics(
    otel_grpc_endpoint_url: Option<&str>,
) -> crate::Result<opentelemetry_sdk::metrics::SdkMeterProvider> {
    let builder =
        opentelemetry_sdk::metrics::SdkMeterProvider::builder().with_resource(RESOURCE.clone());

    let provider = match otel_grpc_endpoint_url {
        None => {
            info!("opentelemetry_stdout initialized");
            builder.with_periodic_exporter(opentelemetry_stdout::MetricExporter::default())
        }
        Some(otel_grpc_endpoint_url) => {
            info!("opentelemetry_otlp initialized");
            let otlp_exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_compression(Compression::Gzip)
                .with_endpoint(otel_grpc_endpoint_url)
                .with_timeout(Duration::from_secs(5))
                .build()?;

            builder.with_periodic_exporter(otlp_exporter)
        }
    }
    .build();

    opentelemetry::global::set_meter_provider(provider.clone());

    Ok(provider)
}

pub(crate) fn shutdown_metrics(metric_provider: opentelemetry_sdk::metrics::SdkMeterProvider) {
    if let Err(error) = metric_provider.shutdown() {
        error!("Error during metric shutdown: {error:?}");
    }
}

// Cache metrics

static DISK_HIT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("cache.disk_hit")
        .with_description("Number of disk cache hits")
        .build()
});

static INDEX_HIT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("cache.index_hit")
        .with_description("Number of recency index hits")
        .build()
});

static ORIGIN_FETCH: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("origin.fetch")
        .with_description("Number of origin fetches")
        .build()
});

static ORIGIN_BYTES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("origin.bytes_transferred")
        .with_description("Total bytes transferred from the origin")
        .build()
});

static ORIGIN_FETCH_ERROR: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("origin.fetch_error")
        .with_description("Number of failed origin fetches")
        .build()
});

static PROMOTION_ERROR: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("cache.promotion_error")
        .with_description("Number of failures moving fetched keys into the cache tree")
        .build()
});

static EVICTION: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("cache.eviction")
        .with_description("Number of byte-budget evictions")
        .build()
});

static STALE_REFRESH: LazyLock<Counter<u64>> = LazyLock::new(|| {
    opentelemetry::global::meter(CARGO_CRATE_NAME)
        .u64_counter("cache.stale_refresh")
        .with_description("Number of stale entries evicted on mutable-bucket requests")
        .build()
});

pub(crate) fn record_disk_hit() {
    DISK_HIT.add(1, &[]);
    PROM_DISK_HIT.inc();
}

pub(crate) fn record_index_hit() {
    INDEX_HIT.add(1, &[]);
    PROM_INDEX_HIT.inc();
}

pub(crate) fn record_origin_fetch(bytes: u64) {
    ORIGIN_FETCH.add(1, &[]);
    ORIGIN_BYTES.add(bytes, &[]);
    PROM_ORIGIN_FETCH.inc();
    PROM_ORIGIN_BYTES.inc_by(bytes);
}

pub(crate) fn record_origin_fetch_error() {
    ORIGIN_FETCH_ERROR.add(1, &[]);
    PROM_ORIGIN_FETCH_ERROR.inc();
}

pub(crate) fn record_promotion_error() {
    PROMOTION_ERROR.add(1, &[]);
    PROM_PROMOTION_ERROR.inc();
}

pub(crate) fn record_eviction() {
    EVICTION.add(1, &[]);
    PROM_EVICTION.inc();
}

pub(crate) fn record_stale_refresh() {
    STALE_REFRESH.add(1, &[]);
    PROM_STALE_REFRESH.inc();
}
