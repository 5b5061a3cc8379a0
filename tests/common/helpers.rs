use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use key_cache::{
    BoundedCache, CachedBatchGetter, DigestFreshness, DiskCache, OriginFetcher, RefreshingGetter,
};
use tempfile::TempDir;

use super::MockOrigin;

/// The full production tier stack over the mock origin.
pub type Gate = RefreshingGetter<
    BoundedCache<DiskCache<OriginFetcher<MockOrigin>>>,
    DigestFreshness<MockOrigin>,
>;

pub struct TestStack {
    pub origin: Arc<MockOrigin>,
    pub gate: Arc<Gate>,
    pub cache: Arc<BoundedCache<DiskCache<OriginFetcher<MockOrigin>>>>,
    // Held for their Drop cleanup.
    _cache_dir: TempDir,
    _scratch_dir: TempDir,
}

/// Assembles fetcher → disk → bounded → gate over temp directories, the
/// same way the application wires them.
pub fn build_stack(max_bytes: u64) -> TestStack {
    let cache_dir = TempDir::new().unwrap();
    let scratch_dir = TempDir::new().unwrap();

    let origin = Arc::new(MockOrigin::new());
    let fetcher = OriginFetcher::new(origin.clone(), scratch_dir.path().to_path_buf());
    let disk = Arc::new(DiskCache::new(fetcher, cache_dir.path().to_path_buf()));
    let cache = Arc::new(BoundedCache::new(disk, max_bytes));
    let gate = Arc::new(RefreshingGetter::new(
        cache.clone(),
        DigestFreshness::new(origin.clone()),
    ));

    TestStack {
        origin,
        gate,
        cache,
        _cache_dir: cache_dir,
        _scratch_dir: scratch_dir,
    }
}

pub fn keys(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Polls presence until the background eviction settles or the deadline
/// passes. Returns the final presence.
pub async fn present_after_settle<C: CachedBatchGetter>(
    cache: &C,
    bucket: &str,
    key: &str,
    expect_present: bool,
) -> bool {
    for _ in 0..100 {
        if cache.has(bucket, key).await == expect_present {
            return expect_present;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cache.has(bucket, key).await
}

pub fn read_path(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}
