use std::fs::File;
use std::io::Write;
use std::time::Duration;

use prometheus::{Encoder, TextEncoder};
use tracing::{debug, error, info};

use crate::telemetry;

/// Start the Prometheus metrics writer background task.
///
/// Periodically writes the registry to a text file in Prometheus format for
/// node_exporter's textfile collector. Writes are atomic (write to .tmp,
/// then rename) and individual failures don't stop the task.
pub async fn start_metrics_writer(textfile_dir: String) -> crate::Result<()> {
    info!(
        "Prometheus metrics writer started, writing to {}/key_cache.prom",
        textfile_dir
    );

    let tmp_path = format!("{}/key_cache.prom.tmp", textfile_dir);
    let final_path = format!("{}/key_cache.prom", textfile_dir);

    let mut interval = tokio::time::interval(Duration::from_secs(10));

    loop {
        interval.tick().await;

        let metric_families = telemetry::PROMETHEUS_REGISTRY.gather();

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("Failed to encode Prometheus metrics: {}", e);
            continue;
        }

        match write_metrics_atomic(&tmp_path, &final_path, &buffer) {
            Ok(_) => {
                debug!(
                    "Successfully wrote {} bytes to {}",
                    buffer.len(),
                    final_path
                );
            }
            Err(e) => {
                error!("Failed to write metrics file: {}", e);
            }
        }
    }
}

/// Write metrics to file atomically using write-to-temp + rename so the
/// collector never reads a partially written file.
fn write_metrics_atomic(tmp_path: &str, final_path: &str, data: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;

    std::fs::rename(tmp_path, final_path)?;

    Ok(())
}
