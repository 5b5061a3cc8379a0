use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use key_cache::{ObjectDigestSource, ObjectReader, ObjectReaderProvider, OriginError};
use md5::{Digest, Md5};

pub mod helpers;

/// In-memory origin for testing: a bucket/key map with request counters,
/// per-key read failure injection, and digest listing backed by the
/// current content (the way S3 ETags track plain uploads).
pub struct MockOrigin {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_digests: Mutex<HashSet<String>>,
    read_count: AtomicUsize,
    digest_count: AtomicUsize,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashSet::new()),
            failing_digests: Mutex::new(HashSet::new()),
            read_count: AtomicUsize::new(0),
            digest_count: AtomicUsize::new(0),
        }
    }

    /// Sets (or replaces) an object's content.
    pub fn put_object(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
    }

    /// Makes reads of `key` fail until cleared.
    pub fn fail_reads_for(&self, key: &str) {
        self.failing_reads.lock().unwrap().insert(key.to_string());
    }

    /// Makes digest listings of `key` fail until cleared.
    pub fn fail_digests_for(&self, key: &str) {
        self.failing_digests.lock().unwrap().insert(key.to_string());
    }

    /// Number of streaming reads opened (cache hit verification).
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn digest_count(&self) -> usize {
        self.digest_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ObjectReaderProvider for MockOrigin {
    async fn object_reader(&self, bucket: &str, key: &str) -> Result<ObjectReader, OriginError> {
        self.read_count.fetch_add(1, Ordering::SeqCst);

        if self.failing_reads.lock().unwrap().contains(key) {
            return Err(OriginError::Service(format!("injected read failure for {key}")));
        }

        let objects = self.objects.lock().unwrap();
        match objects.get(&(bucket.to_string(), key.to_string())) {
            Some(data) => Ok(Box::new(Cursor::new(data.clone()))),
            None => Err(OriginError::Service(format!("no such key: {bucket}/{key}"))),
        }
    }
}

#[async_trait::async_trait]
impl ObjectDigestSource for MockOrigin {
    async fn current_digest(&self, bucket: &str, key: &str) -> Result<String, OriginError> {
        self.digest_count.fetch_add(1, Ordering::SeqCst);

        if self.failing_digests.lock().unwrap().contains(key) {
            return Err(OriginError::Service(format!(
                "injected digest failure for {key}"
            )));
        }

        let objects = self.objects.lock().unwrap();
        match objects.get(&(bucket.to_string(), key.to_string())) {
            Some(data) => Ok(hex::encode(Md5::digest(data))),
            None => Err(OriginError::Service(format!(
                "key {key} not listed by origin"
            ))),
        }
    }
}
