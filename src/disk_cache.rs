use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::getter::{BatchGetter, CachedBatchGetter, DISK_HIT_STATUS, FetchResult};
use crate::telemetry;

/// A key name that must not be mapped onto the cache tree.
pub struct PathRejected {
    reason: &'static str,
}

impl std::fmt::Display for PathRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "key name rejected: {}", self.reason)
    }
}

/// Deterministic on-disk store under a root directory.
///
/// The file at `<root>/<bucket>/<key>` *is* the cache entry; there is no
/// sidecar metadata. Misses delegate to the wrapped base getter, whose
/// scratch files are promoted into the tree by atomic rename, so a partial
/// write is never visible under the canonical path.
pub struct DiskCache<G> {
    base: G,
    cache_root: PathBuf,
}

impl<G> DiskCache<G> {
    pub fn new(base: G, cache_root: PathBuf) -> Self {
        Self { base, cache_root }
    }

    /// Maps (bucket, key) onto the canonical cache path, refusing names
    /// that would escape the cache root. No filesystem access.
    pub fn path_for(&self, bucket: &str, key: &str) -> Result<PathBuf, PathRejected> {
        if bucket.contains('/') {
            return Err(PathRejected {
                reason: "separator in bucket name",
            });
        }
        checked_segment(bucket)?;

        if key.is_empty() {
            return Err(PathRejected {
                reason: "empty key name",
            });
        }

        let mut path = self.cache_root.join(bucket);
        for segment in key.split('/') {
            checked_segment(segment)?;
            path.push(segment);
        }
        Ok(path)
    }

    /// Moves a freshly-fetched scratch file onto its canonical path.
    async fn promote(&self, mut result: FetchResult) -> FetchResult {
        let Some(scratch_path) = result.local_path.clone() else {
            return result;
        };

        match self.install(&scratch_path, &result.bucket, &result.key).await {
            Ok(canonical) => {
                result.local_path = Some(canonical);
                result
            }
            Err(err) => {
                warn!(
                    bucket = %result.bucket,
                    key = %result.key,
                    error = %err,
                    "failed to promote fetched key into cache"
                );
                telemetry::record_promotion_error();
                result.status = format!("{}; promotion failed: {err}", result.status);
                result.local_path = None;
                result
            }
        }
    }

    async fn install(&self, scratch: &Path, bucket: &str, key: &str) -> io::Result<PathBuf> {
        let canonical = self
            .path_for(bucket, key)
            .map_err(|reject| io::Error::new(io::ErrorKind::InvalidInput, reject.to_string()))?;

        if let Some(parent) = canonical.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::rename(scratch, &canonical).await {
            Ok(()) => Ok(canonical),
            Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
                // Scratch dir lives on another filesystem: stage a copy next
                // to the destination so the final rename stays atomic.
                let parent = canonical.parent().unwrap_or(Path::new("."));
                let staged = tempfile::Builder::new()
                    .prefix(".promote-")
                    .tempfile_in(parent)?;
                fs::copy(scratch, staged.path()).await?;
                let (_file, staged_path) = staged.keep().map_err(|err| err.error)?;
                fs::rename(&staged_path, &canonical).await?;
                let _ = fs::remove_file(scratch).await;
                Ok(canonical)
            }
            Err(err) => Err(err),
        }
    }
}

fn checked_segment(segment: &str) -> Result<(), PathRejected> {
    if segment.is_empty() {
        return Err(PathRejected {
            reason: "empty path segment",
        });
    }
    if segment == "." || segment == ".." {
        return Err(PathRejected {
            reason: "relative path segment",
        });
    }
    if segment.contains('\0') {
        return Err(PathRejected {
            reason: "NUL byte in name",
        });
    }
    Ok(())
}

#[async_trait::async_trait]
impl<G: BatchGetter> BatchGetter for DiskCache<G> {
    async fn get(&self, bucket: &str, keys: &[String]) -> Vec<FetchResult> {
        let mut out = Vec::with_capacity(keys.len());
        let mut missing = Vec::with_capacity(keys.len());

        for key in keys {
            match self.path_for(bucket, key) {
                Err(reject) => {
                    out.push(FetchResult::failure(bucket, key, reject.to_string()));
                }
                Ok(path) => {
                    if is_file(&path).await {
                        debug!(bucket, key, "disk cache hit");
                        telemetry::record_disk_hit();
                        out.push(FetchResult::hit(bucket, key, path, DISK_HIT_STATUS));
                    } else {
                        missing.push(key.clone());
                    }
                }
            }
        }

        if !missing.is_empty() {
            for result in self.base.get(bucket, &missing).await {
                out.push(self.promote(result).await);
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl<G: BatchGetter> CachedBatchGetter for DiskCache<G> {
    async fn has(&self, bucket: &str, key: &str) -> bool {
        match self.path_for(bucket, key) {
            Ok(path) => is_file(&path).await,
            Err(_) => false,
        }
    }

    async fn remove(&self, bucket: &str, key: &str) -> bool {
        let Ok(path) = self.path_for(bucket, key) else {
            return false;
        };
        match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => {
                warn!(bucket, key, error = %err, "failed to remove cached key");
                false
            }
        }
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
