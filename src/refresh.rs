use std::path::Path;
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::getter::{CachedBatchGetter, FetchResult};
use crate::origin::{ObjectDigestSource, OriginError};
use crate::telemetry;

/// Decides whether a cached entry still matches the origin's current
/// version of the same key.
#[async_trait::async_trait]
pub trait FreshnessProbe: Send + Sync {
    async fn is_stale(&self, result: &FetchResult) -> Result<bool, OriginError>;
}

/// Probe comparing the origin's listed digest against the cached entry's.
///
/// Ordinary disk hits carry no stored digest, so the probe re-hashes the
/// cached file in that case.
pub struct DigestFreshness<O> {
    origin: Arc<O>,
}

impl<O> DigestFreshness<O> {
    pub fn new(origin: Arc<O>) -> Self {
        Self { origin }
    }
}

#[async_trait::async_trait]
impl<O: ObjectDigestSource> FreshnessProbe for DigestFreshness<O> {
    async fn is_stale(&self, result: &FetchResult) -> Result<bool, OriginError> {
        let current = self
            .origin
            .current_digest(&result.bucket, &result.key)
            .await?;

        let cached = if result.content_md5.is_empty() {
            let Some(path) = result.local_path.as_deref() else {
                // Nothing materialized, nothing to refresh.
                return Ok(false);
            };
            file_md5_hex(path).await?
        } else {
            result.content_md5.clone()
        };

        Ok(cached != current)
    }
}

async fn file_md5_hex(path: &Path) -> Result<String, OriginError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Outermost cache layer: serves mutable-bucket requests by evicting stale
/// entries before the batch is (re)served.
///
/// For immutable requests this is a plain pass-through to the wrapped
/// cache. For mutable requests, every entry already present is checked
/// against the freshness probe; stale entries are removed from the cache
/// and refetched alongside the absent set. A probe failure keeps the
/// cached entry.
pub struct RefreshingGetter<C, P> {
    cache: Arc<C>,
    probe: P,
}

impl<C: CachedBatchGetter, P: FreshnessProbe> RefreshingGetter<C, P> {
    pub fn new(cache: Arc<C>, probe: P) -> Self {
        Self { cache, probe }
    }

    pub async fn get(&self, bucket: &str, keys: &[String], mutable: bool) -> Vec<FetchResult> {
        let mut present = Vec::with_capacity(keys.len());
        let mut absent = Vec::with_capacity(keys.len());
        for key in keys {
            if self.cache.has(bucket, key).await {
                present.push(key.clone());
            } else {
                absent.push(key.clone());
            }
        }

        let mut out = Vec::with_capacity(keys.len());

        if !present.is_empty() {
            for result in self.cache.get(bucket, &present).await {
                if !mutable {
                    out.push(result);
                    continue;
                }
                match self.probe.is_stale(&result).await {
                    Ok(false) => out.push(result),
                    Ok(true) => {
                        debug!(bucket, key = %result.key, "stale entry evicted before refetch");
                        telemetry::record_stale_refresh();
                        self.cache.remove(bucket, &result.key).await;
                        absent.push(result.key);
                    }
                    Err(err) => {
                        warn!(
                            bucket,
                            key = %result.key,
                            error = %err,
                            "freshness check failed, serving cached entry"
                        );
                        out.push(result);
                    }
                }
            }
        }

        if !absent.is_empty() {
            out.extend(self.cache.get(bucket, &absent).await);
        }

        out
    }
}
