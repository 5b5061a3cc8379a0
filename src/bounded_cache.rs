use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};

use crate::getter::{BatchGetter, CachedBatchGetter, FetchResult, INDEX_HIT_STATUS};
use crate::telemetry;

/// Capacity of the byte-delta channel. Producers block on send once the
/// eviction task falls this far behind; it drains aggressively, so the
/// stall is momentary.
const DELTA_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    bucket: String,
    key: String,
}

impl EntryKey {
    fn new(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

type Index = LruCache<EntryKey, u64>;

/// Byte-budgeted admission layer over a cached tier.
///
/// The recency index is an accounting view over the wrapped tier, not an
/// independent cache: the wrapped tier (disk) stays the source of truth for
/// presence, the index for recency and per-entry bytes. Admissions send
/// their byte counts as positive deltas on a channel consumed by a
/// background eviction task, which owns the running total and pops
/// least-recently-used entries from index and wrapped tier together until
/// the total is back under budget. Explicit removals send negative deltas
/// so the total stays truthful.
pub struct BoundedCache<G> {
    base: Arc<G>,
    index: Arc<RwLock<Index>>,
    deltas: mpsc::Sender<i64>,
}

impl<G: CachedBatchGetter + 'static> BoundedCache<G> {
    /// Wraps `base` with a byte budget and spawns the eviction task. The
    /// task exits once the cache (and every sender it handed out) is gone.
    pub fn new(base: Arc<G>, max_bytes: u64) -> Self {
        let index = Arc::new(RwLock::new(LruCache::unbounded()));
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);

        tokio::spawn(enforce_budget(rx, index.clone(), base.clone(), max_bytes));

        Self {
            base,
            index,
            deltas: tx,
        }
    }
}

/// The eviction loop. Sole owner and writer of the running byte total.
async fn enforce_budget<G: CachedBatchGetter>(
    mut deltas: mpsc::Receiver<i64>,
    index: Arc<RwLock<Index>>,
    base: Arc<G>,
    max_bytes: u64,
) {
    let mut total: i64 = 0;
    while let Some(delta) = deltas.recv().await {
        total += delta;
        if total <= max_bytes as i64 {
            continue;
        }

        // Index and wrapped tier are evicted in one critical section so a
        // reader never observes an indexed entry with no backing file.
        let mut index = index.write().await;
        while total > max_bytes as i64 {
            let Some((entry, bytes)) = index.pop_lru() else {
                warn!(
                    total,
                    max_bytes, "cache above byte budget but recency index is empty"
                );
                break;
            };
            debug!(bucket = %entry.bucket, key = %entry.key, bytes, "evicting to stay within byte budget");
            base.remove(&entry.bucket, &entry.key).await;
            telemetry::record_eviction();
            total -= bytes as i64;
        }
    }
}

#[async_trait::async_trait]
impl<G: CachedBatchGetter> BatchGetter for BoundedCache<G> {
    async fn get(&self, bucket: &str, keys: &[String]) -> Vec<FetchResult> {
        let mut known = Vec::with_capacity(keys.len());
        let mut missing = Vec::with_capacity(keys.len());
        {
            let index = self.index.read().await;
            for key in keys {
                if index.contains(&EntryKey::new(bucket, key)) {
                    known.push(key.clone());
                } else {
                    missing.push(key.clone());
                }
            }
        }

        let mut out = Vec::with_capacity(keys.len());

        if !known.is_empty() {
            let results = self.base.get(bucket, &known).await;
            let mut index = self.index.write().await;
            for mut result in results {
                // get() moves the node to the front of the recency list.
                index.get(&EntryKey::new(bucket, &result.key));
                if result.local_path.is_some() && result.bytes_transferred == 0 {
                    // Keep the inner tier's disposition visible.
                    result.status = format!("{INDEX_HIT_STATUS} ({})", result.status);
                    telemetry::record_index_hit();
                }
                out.push(result);
            }
        }

        if !missing.is_empty() {
            let results = self.base.get(bucket, &missing).await;
            let mut batch_delta: i64 = 0;
            {
                let mut index = self.index.write().await;
                for result in &results {
                    if result.local_path.is_none() {
                        continue;
                    }
                    batch_delta += result.bytes_transferred as i64;
                    index.put(
                        EntryKey::new(bucket, &result.key),
                        result.bytes_transferred,
                    );
                }
            }
            out.extend(results);
            // Blocks when the channel is full; the eviction task drains it.
            let _ = self.deltas.send(batch_delta).await;
        }

        out
    }
}

#[async_trait::async_trait]
impl<G: CachedBatchGetter> CachedBatchGetter for BoundedCache<G> {
    async fn has(&self, bucket: &str, key: &str) -> bool {
        self.base.has(bucket, key).await
    }

    async fn remove(&self, bucket: &str, key: &str) -> bool {
        let dropped = {
            let mut index = self.index.write().await;
            index.pop(&EntryKey::new(bucket, key))
        };
        let removed = self.base.remove(bucket, key).await;
        if let Some(bytes) = dropped {
            let _ = self.deltas.send(-(bytes as i64)).await;
        }
        removed
    }
}
