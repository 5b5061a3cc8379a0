use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::getter::{CachedBatchGetter, FetchResult, reorder_results};
use crate::refresh::{FreshnessProbe, RefreshingGetter};

/// Wire shape of the batch request body.
#[derive(Deserialize)]
pub struct CacheRequest {
    pub bucket_name: String,
    pub keynames: Vec<String>,
    #[serde(default)]
    pub mutable_bucket: bool,
}

/// Wire shape of one response element. `local_path` is null iff the fetch
/// failed; callers inspect its presence rather than parsing `status`.
#[derive(Serialize)]
pub struct KeyResponse {
    pub key_name: String,
    pub status: String,
    pub local_path: Option<String>,
}

impl From<FetchResult> for KeyResponse {
    fn from(result: FetchResult) -> Self {
        Self {
            key_name: result.key,
            status: result.status,
            local_path: result
                .local_path
                .map(|path| path.to_string_lossy().into_owned()),
        }
    }
}

/// Request-level failure: the only cases that surface as HTTP 500.
#[derive(Debug)]
pub enum RequestError {
    Decode(String),
    Encode(String),
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Decode(message) => write!(f, "bad request body: {message}"),
            RequestError::Encode(message) => write!(f, "response encoding failed: {message}"),
        }
    }
}

/// Decodes a request payload, runs the batch through the gate, and encodes
/// the response in request order. Per-key failures ride inside the
/// response; only decode/encode failures surface as errors.
pub async fn respond<C, P>(
    gate: &RefreshingGetter<C, P>,
    payload: &[u8],
) -> Result<Vec<u8>, RequestError>
where
    C: CachedBatchGetter,
    P: FreshnessProbe,
{
    let request: CacheRequest =
        serde_json::from_slice(payload).map_err(|err| RequestError::Decode(err.to_string()))?;
    if request.keynames.is_empty() {
        return Err(RequestError::Decode("keynames must be non-empty".to_string()));
    }

    debug!(
        bucket = %request.bucket_name,
        keys = request.keynames.len(),
        mutable = request.mutable_bucket,
        "serving batch request"
    );

    let results = gate
        .get(&request.bucket_name, &request.keynames, request.mutable_bucket)
        .await;
    let ordered = reorder_results(&request.bucket_name, &request.keynames, results);

    let body: Vec<KeyResponse> = ordered.into_iter().map(KeyResponse::from).collect();
    serde_json::to_vec(&body).map_err(|err| RequestError::Encode(err.to_string()))
}

/// hyper entry point for one request.
pub async fn handle<C, P>(
    gate: Arc<RefreshingGetter<C, P>>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>>
where
    C: CachedBatchGetter,
    P: FreshnessProbe,
{
    if req.method() != Method::POST {
        return plain_response(StatusCode::METHOD_NOT_ALLOWED, "POST only\n");
    }

    let payload = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return plain_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("failed to read request body: {err}\n"),
            );
        }
    };

    match respond(gate.as_ref(), &payload).await {
        Ok(json) => Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from(json)))
            .unwrap_or_else(|_| plain_response(StatusCode::INTERNAL_SERVER_ERROR, "")),
        Err(err) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, &format!("{err}\n")),
    }
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;
    use crate::getter::BatchGetter;
    use crate::origin::OriginError;

    /// Cached tier serving fixed content, returning batch results in
    /// reverse order to exercise response reordering.
    struct ReversedCache {
        entries: Mutex<HashMap<String, String>>,
    }

    impl ReversedCache {
        fn new(entries: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                entries: Mutex::new(
                    entries
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait::async_trait]
    impl BatchGetter for ReversedCache {
        async fn get(&self, bucket: &str, keys: &[String]) -> Vec<FetchResult> {
            let entries = self.entries.lock().unwrap();
            let mut out = Vec::with_capacity(keys.len());
            for key in keys.iter().rev() {
                match entries.get(key) {
                    Some(status) => out.push(FetchResult {
                        bucket: bucket.to_string(),
                        key: key.clone(),
                        local_path: Some(PathBuf::from(format!("/cache/{key}"))),
                        status: status.clone(),
                        bytes_transferred: 0,
                        content_md5: String::new(),
                    }),
                    None => out.push(FetchResult::failure(bucket, key, "no such key".to_string())),
                }
            }
            out
        }
    }

    #[async_trait::async_trait]
    impl CachedBatchGetter for ReversedCache {
        async fn has(&self, _bucket: &str, key: &str) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }

        async fn remove(&self, _bucket: &str, key: &str) -> bool {
            self.entries.lock().unwrap().remove(key).is_some()
        }
    }

    struct NeverStale;

    #[async_trait::async_trait]
    impl FreshnessProbe for NeverStale {
        async fn is_stale(&self, _result: &FetchResult) -> Result<bool, OriginError> {
            Ok(false)
        }
    }

    fn gate(entries: &[(&str, &str)]) -> RefreshingGetter<ReversedCache, NeverStale> {
        RefreshingGetter::new(ReversedCache::new(entries), NeverStale)
    }

    #[tokio::test]
    async fn response_follows_request_order() {
        let gate = gate(&[("k1", "one"), ("k2", "two"), ("k3", "three")]);
        let payload = br#"{"bucket_name":"b","keynames":["k1","k2","k3"]}"#;

        let body = respond(&gate, payload).await.unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();

        let names: Vec<&str> = parsed
            .iter()
            .map(|v| v["key_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["k1", "k2", "k3"]);
    }

    #[tokio::test]
    async fn failed_keys_serialize_null_paths() {
        let gate = gate(&[("k1", "one")]);
        let payload = br#"{"bucket_name":"b","keynames":["k1","absent"]}"#;

        let body = respond(&gate, payload).await.unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();

        assert_eq!(parsed.len(), 2);
        assert!(parsed[0]["local_path"].is_string());
        assert!(parsed[1]["local_path"].is_null());
        assert_eq!(parsed[1]["status"], "no such key");
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let gate = gate(&[]);

        let err = respond(&gate, b"{not json").await.err().unwrap();
        assert!(matches!(err, RequestError::Decode(_)));
    }

    #[tokio::test]
    async fn empty_keynames_is_a_decode_error() {
        let gate = gate(&[]);
        let payload = br#"{"bucket_name":"b","keynames":[]}"#;

        let err = respond(&gate, payload).await.err().unwrap();
        assert!(matches!(err, RequestError::Decode(_)));
    }

    #[tokio::test]
    async fn mutable_flag_defaults_to_false() {
        let payload = br#"{"bucket_name":"b","keynames":["k"]}"#;
        let request: CacheRequest = serde_json::from_slice(payload).unwrap();
        assert!(!request.mutable_bucket);

        let payload = br#"{"bucket_name":"b","keynames":["k"],"mutable_bucket":true}"#;
        let request: CacheRequest = serde_json::from_slice(payload).unwrap();
        assert!(request.mutable_bucket);
    }
}
