use tokio::io::AsyncRead;

/// Boxed streaming byte source for one origin object.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Failure talking to the origin or reading what it handed back.
pub enum OriginError {
    Service(String),
    Io(std::io::Error),
}

impl std::error::Error for OriginError {}

impl std::fmt::Display for OriginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            OriginError::Service(message) => write!(f, "origin error: {message}"),
            OriginError::Io(io_error) => write!(f, "origin read error: {io_error}"),
        }
    }
}

impl std::fmt::Debug for OriginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl From<std::io::Error> for OriginError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Opens a streaming reader for (bucket, key). The leaf of the cache stack.
#[async_trait::async_trait]
pub trait ObjectReaderProvider: Send + Sync {
    async fn object_reader(&self, bucket: &str, key: &str) -> Result<ObjectReader, OriginError>;
}

/// Reports the origin's current content digest for (bucket, key).
///
/// Used by the freshness probe on mutable-bucket requests.
#[async_trait::async_trait]
pub trait ObjectDigestSource: Send + Sync {
    async fn current_digest(&self, bucket: &str, key: &str) -> Result<String, OriginError>;
}

/// Origin adapter over the AWS SDK.
pub struct S3Origin {
    client: aws_sdk_s3::Client,
}

impl S3Origin {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ObjectReaderProvider for S3Origin {
    async fn object_reader(&self, bucket: &str, key: &str) -> Result<ObjectReader, OriginError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| OriginError::Service(err.to_string()))?;

        Ok(Box::new(resp.body.into_async_read()))
    }
}

#[async_trait::async_trait]
impl ObjectDigestSource for S3Origin {
    /// Lists the key (prefix match, one entry) and returns its ETag with the
    /// surrounding quotes stripped. For plain uploads the ETag is the hex
    /// MD5 of the object's bytes; multipart ETags simply never match a
    /// content hash, which degrades to always-refetch rather than staleness.
    async fn current_digest(&self, bucket: &str, key: &str) -> Result<String, OriginError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(key)
            .max_keys(1)
            .send()
            .await
            .map_err(|err| OriginError::Service(err.to_string()))?;

        let object = resp
            .contents()
            .first()
            .ok_or_else(|| OriginError::Service(format!("key {key} not listed by origin")))?;

        let e_tag = object
            .e_tag()
            .ok_or_else(|| OriginError::Service(format!("no etag listed for key {key}")))?;

        Ok(e_tag.trim_matches('"').to_ascii_lowercase())
    }
}
