use std::path::{Path, PathBuf};
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::getter::{BatchGetter, FetchResult};
use crate::origin::{ObjectReaderProvider, OriginError};
use crate::telemetry;

/// Capacity of the fan-in inbox. Fetch tasks block on send once the
/// collector falls this far behind.
const INBOX_CAPACITY: usize = 16;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Fetches each key of a batch concurrently from the origin into a fresh
/// scratch file, computing the content MD5 in-stream.
///
/// Results come back in completion order, one per requested key. A key
/// whose fetch fails carries the failure text in its status and no local
/// path; sibling keys in the batch are unaffected.
pub struct OriginFetcher<P> {
    provider: Arc<P>,
    scratch_dir: PathBuf,
}

impl<P> OriginFetcher<P> {
    pub fn new(provider: Arc<P>, scratch_dir: PathBuf) -> Self {
        Self {
            provider,
            scratch_dir,
        }
    }
}

#[async_trait::async_trait]
impl<P: ObjectReaderProvider + 'static> BatchGetter for OriginFetcher<P> {
    async fn get(&self, bucket: &str, keys: &[String]) -> Vec<FetchResult> {
        let (tx, mut rx) = mpsc::channel(INBOX_CAPACITY);

        for key in keys {
            let provider = self.provider.clone();
            let scratch_dir = self.scratch_dir.clone();
            let bucket = bucket.to_string();
            let key = key.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let result = fetch_key(provider.as_ref(), &scratch_dir, &bucket, &key).await;
                // The collector only hangs up if the whole batch was dropped.
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        let mut out = Vec::with_capacity(keys.len());
        while let Some(result) = rx.recv().await {
            out.push(result);
        }
        out
    }
}

async fn fetch_key<P: ObjectReaderProvider>(
    provider: &P,
    scratch_dir: &Path,
    bucket: &str,
    key: &str,
) -> FetchResult {
    match stream_to_scratch(provider, scratch_dir, bucket, key).await {
        Ok((local_path, written, content_md5)) => {
            debug!(bucket, key, bytes = written, "fetched key from origin");
            telemetry::record_origin_fetch(written);
            FetchResult {
                bucket: bucket.to_string(),
                key: key.to_string(),
                local_path: Some(local_path),
                status: format!("cache miss, transferred {written} bytes"),
                bytes_transferred: written,
                content_md5,
            }
        }
        Err(err) => {
            debug!(bucket, key, error = %err, "origin fetch failed");
            telemetry::record_origin_fetch_error();
            FetchResult::failure(bucket, key, err.to_string())
        }
    }
}

/// Streams one object into a scratch file while hashing, returning the
/// kept path, the byte count, and the hex digest. The temp file guard
/// unlinks the scratch file on any early return.
async fn stream_to_scratch<P: ObjectReaderProvider>(
    provider: &P,
    scratch_dir: &Path,
    bucket: &str,
    key: &str,
) -> Result<(PathBuf, u64, String), OriginError> {
    let mut reader = provider.object_reader(bucket, key).await?;

    let scratch = tempfile::Builder::new()
        .prefix("fetch-")
        .tempfile_in(scratch_dir)?;
    let mut file = tokio::fs::File::from_std(scratch.reopen()?);

    let mut hasher = Md5::new();
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut written: u64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).await?;
        written += n as u64;
    }
    file.flush().await?;
    drop(file);

    let (_file, path) = scratch.keep().map_err(|err| err.error)?;
    Ok((path, written, hex::encode(hasher.finalize())))
}
