use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

/// Status text for a key served straight from the disk tier.
pub const DISK_HIT_STATUS: &str = "disk cache hit";

/// Status text for a key the recency index already knew about.
pub const INDEX_HIT_STATUS: &str = "cache_hit";

/// Per-key outcome of a batch get.
///
/// `local_path` is `Some` iff the key's bytes were materialized; on failure
/// the human-readable reason lives in `status`. Outer cache tiers rewrite
/// `local_path` (promotion into the cache tree) and decorate `status`, but
/// never drop a result: every requested key yields exactly one `FetchResult`.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub bucket: String,
    pub key: String,
    pub local_path: Option<PathBuf>,
    pub status: String,
    pub bytes_transferred: u64,
    /// Lowercase hex MD5 of the fetched bytes; empty on cache hits.
    pub content_md5: String,
}

impl FetchResult {
    /// A failed attempt: no local path, the reason carried in `status`.
    pub fn failure(bucket: &str, key: &str, status: String) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            local_path: None,
            status,
            bytes_transferred: 0,
            content_md5: String::new(),
        }
    }

    /// A cache hit served from an already-materialized file.
    pub fn hit(bucket: &str, key: &str, local_path: PathBuf, status: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            local_path: Some(local_path),
            status: status.to_string(),
            bytes_transferred: 0,
            content_md5: String::new(),
        }
    }
}

/// The uniform batch-get contract every cache tier implements.
///
/// Implementations return one result per input key. They may reorder
/// results relative to `keys`; callers that need input order reconcile it
/// themselves (see [`reorder_results`]).
#[async_trait::async_trait]
pub trait BatchGetter: Send + Sync {
    async fn get(&self, bucket: &str, keys: &[String]) -> Vec<FetchResult>;
}

/// A tier that can also answer presence queries and drop entries.
#[async_trait::async_trait]
pub trait CachedBatchGetter: BatchGetter {
    async fn has(&self, bucket: &str, key: &str) -> bool;

    /// Removes the entry, returning whether one was actually present.
    async fn remove(&self, bucket: &str, key: &str) -> bool;
}

/// Restores request order over an unordered batch of results.
///
/// Duplicate key names are matched positionally: the nth occurrence of a
/// name in `keys` receives the nth result carrying that name. A key with no
/// matching result (which a well-behaved tier never produces) gets a
/// synthesized failure so the response stays one-to-one with the request.
pub fn reorder_results(bucket: &str, keys: &[String], results: Vec<FetchResult>) -> Vec<FetchResult> {
    let mut by_key: HashMap<String, VecDeque<FetchResult>> = HashMap::with_capacity(results.len());
    for result in results {
        by_key.entry(result.key.clone()).or_default().push_back(result);
    }

    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        match by_key.get_mut(key).and_then(VecDeque::pop_front) {
            Some(result) => out.push(result),
            None => out.push(FetchResult::failure(
                bucket,
                key,
                "no result produced for key".to_string(),
            )),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_for(key: &str, status: &str) -> FetchResult {
        FetchResult::failure("b", key, status.to_string())
    }

    #[test]
    fn reorder_restores_input_order() {
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let results = vec![
            result_for("c", "third"),
            result_for("a", "first"),
            result_for("b", "second"),
        ];

        let ordered = reorder_results("b", &keys, results);

        let names: Vec<&str> = ordered.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn reorder_matches_duplicates_positionally() {
        let keys = vec!["a".to_string(), "a".to_string()];
        let results = vec![result_for("a", "one"), result_for("a", "two")];

        let ordered = reorder_results("b", &keys, results);

        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].status, "one");
        assert_eq!(ordered[1].status, "two");
    }

    #[test]
    fn reorder_synthesizes_missing_results() {
        let keys = vec!["a".to_string(), "missing".to_string()];
        let results = vec![result_for("a", "ok")];

        let ordered = reorder_results("b", &keys, results);

        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[1].key, "missing");
        assert!(ordered[1].local_path.is_none());
    }
}
