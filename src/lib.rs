//! # key-cache
//!
//! A local HTTP-fronted read-through cache for S3 objects.
//!
//! Clients POST a bucket name and a list of key names; the service answers
//! with a locally materialized file path per key, so downstream consumers
//! open a stable filesystem path instead of re-streaming from the origin
//! on every access.
//!
//! ## Architecture
//!
//! Requests flow through a stack of tiers, each wrapping the next behind
//! the same batch-get contract:
//!
//! - [`OriginFetcher`]: fetches each key of a batch concurrently into a
//!   scratch file, hashing the stream as it goes
//! - [`DiskCache`]: deterministic `<root>/<bucket>/<key>` store; misses are
//!   fetched through the tier below and promoted by atomic rename
//! - [`BoundedCache`]: recency index plus a background eviction task that
//!   keeps total cached bytes under a configured budget
//! - [`RefreshingGetter`]: for mutable buckets, evicts entries whose
//!   content no longer matches the origin before serving the batch
//!
//! ## Example
//!
//! ```no_run
//! use key_cache::{Config, start_app};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> key_cache::Result<()> {
//!     let mut env = HashMap::new();
//!     env.insert("CACHE_DIR".to_string(), "/var/cache/keys".to_string());
//!     env.insert("UPSTREAM_ENDPOINT".to_string(), "http://localhost:9000".to_string());
//!
//!     let config = Config::from_env(&env);
//!     start_app(config).await
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use aws_credential_types::Credentials;
use hyper::service::service_fn;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ConnBuilder,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub use self::bounded_cache::BoundedCache;
pub use self::config::Config;
pub use self::disk_cache::DiskCache;
pub use self::error::ApplicationError;
pub use self::fetcher::OriginFetcher;
pub use self::getter::{
    BatchGetter, CachedBatchGetter, DISK_HIT_STATUS, FetchResult, INDEX_HIT_STATUS,
    reorder_results,
};
pub use self::origin::{
    ObjectDigestSource, ObjectReader, ObjectReaderProvider, OriginError, S3Origin,
};
pub use self::refresh::{DigestFreshness, FreshnessProbe, RefreshingGetter};
pub use self::server::{CacheRequest, KeyResponse};

mod bounded_cache;
mod config;
mod disk_cache;
mod error;
mod fetcher;
mod getter;
mod metrics_writer;
mod origin;
mod refresh;
pub mod server;
mod telemetry;

/// Result type alias using [`ApplicationError`] as the error type.
pub type Result<T> = std::result::Result<T, ApplicationError>;

static CARGO_CRATE_NAME: &str = env!("CARGO_CRATE_NAME");

/// Starts the key cache server.
///
/// Initializes telemetry, connects to the origin, assembles the cache
/// tiers, and serves the batch endpoint until SIGINT (Ctrl+C), then shuts
/// down gracefully with a 10-second timeout.
pub async fn start_app(config: Config) -> Result<()> {
    let (metrics_provider, logs_provider) = telemetry::initialize_telemetry(&config)?;

    info!("Starting {CARGO_CRATE_NAME} with {config}");

    tokio::fs::create_dir_all(&config.cache_dir).await?;
    tokio::fs::create_dir_all(&config.scratch_dir).await?;

    // Build AWS SDK config for the origin
    let mut loader = aws_config::from_env();
    if let Some(endpoint) = &config.upstream_endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    loader = loader.region(aws_sdk_s3::config::Region::new(
        config.upstream_region.clone(),
    ));
    if let (Some(key_id), Some(secret)) = (
        &config.upstream_access_key_id,
        &config.upstream_secret_access_key,
    ) {
        loader = loader.credentials_provider(Credentials::new(
            key_id,
            secret,
            None,
            None,
            "key-cache-static",
        ));
    }
    let sdk_config = loader.load().await;

    let s3_client = aws_sdk_s3::Client::from_conf(
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build(),
    );

    // Assemble the cache tiers, bottom-up
    let origin = Arc::new(S3Origin::new(s3_client));
    let fetcher = OriginFetcher::new(origin.clone(), config.scratch_dir.clone());
    let disk = Arc::new(DiskCache::new(fetcher, config.cache_dir.clone()));
    let bounded = Arc::new(BoundedCache::new(disk, config.cache_max_bytes));
    let gate = Arc::new(RefreshingGetter::new(
        bounded,
        DigestFreshness::new(origin),
    ));

    // Start Prometheus metrics writer if configured
    let metrics_writer_handle = if let Some(textfile_dir) = config.prometheus_textfile_dir.clone() {
        info!(
            "Starting Prometheus textfile writer to {}/key_cache.prom",
            textfile_dir
        );
        Some(tokio::spawn(async move {
            if let Err(e) = metrics_writer::start_metrics_writer(textfile_dir).await {
                error!("Metrics writer failed: {:?}", e);
            }
        }))
    } else {
        info!("Prometheus textfile writer disabled (PROMETHEUS_TEXTFILE_DIR not set)");
        None
    };

    let service = service_fn(move |req| {
        let gate = gate.clone();
        async move { Ok::<_, std::convert::Infallible>(server::handle(gate, req).await) }
    });

    // Start hyper server
    let listener = TcpListener::bind(config.listen_addr).await?;
    let http_server = ConnBuilder::new(TokioExecutor::new());
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());

    info!("Listening on http://{}/", config.listen_addr);

    loop {
        let (socket, remote_addr) = tokio::select! {
            res = listener.accept() => {
                match res {
                    Ok(conn) => conn,
                    Err(err) => {
                        error!("Error accepting connection: {err}");
                        continue;
                    }
                }
            }
            _ = ctrl_c.as_mut() => { break; }
        };

        debug!("Accepted connection from {remote_addr}");

        let conn = http_server.serve_connection(TokioIo::new(socket), service.clone());
        let conn = graceful.watch(conn.into_owned());
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                debug!("Connection error: {err}");
            }
        });
    }

    info!("Shutting down gracefully...");

    tokio::select! {
        () = graceful.shutdown() => {
            info!("Graceful shutdown complete");
        },
        () = tokio::time::sleep(Duration::from_secs(10)) => {
            info!("Graceful shutdown timed out after 10s, aborting");
        }
    }

    if let Some(handle) = metrics_writer_handle {
        handle.abort();
        info!("Metrics writer task aborted");
    }

    telemetry::shutdown_metrics(metrics_provider);
    telemetry::shutdown_logs(logs_provider);

    Ok(())
}
