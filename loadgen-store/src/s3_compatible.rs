use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, BucketConfiguration, Region};

use crate::error::{StoreError, StoreResult};
use crate::store::{GetResponse, ObjectStore};

/// Content type attached to every object written by the load generator.
const CONTENT_TYPE: &str = "text/plain";

/// Connection settings for an [`S3Store`].
#[derive(Clone)]
pub struct S3Config {
    /// The `host:port` of the S3 endpoint, without scheme.
    pub endpoint: String,
    /// The region name sent with requests and used when creating buckets.
    pub region: String,
    /// Access key ID. Anonymous requests are sent if this is `None`.
    pub access_key: Option<String>,
    /// Secret access key.
    pub secret_key: Option<String>,
    /// Whether to connect via HTTPS.
    pub use_tls: bool,
    /// Whether to address buckets by path instead of by subdomain.
    ///
    /// Most self-hosted stores such as MinIO require path-style addressing.
    pub path_style: bool,
    /// Timeout applied to every request, if any.
    pub request_timeout: Option<Duration>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[redacted]"))
            .field("use_tls", &self.use_tls)
            .field("path_style", &self.path_style)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// An [`ObjectStore`] talking to an S3-compatible endpoint.
pub struct S3Store {
    region: Region,
    credentials: Credentials,
    path_style: bool,
    request_timeout: Option<Duration>,
    buckets: Mutex<HashMap<String, Box<Bucket>>>,
}

impl S3Store {
    /// Creates a new store for the given endpoint.
    ///
    /// No request is sent until the first operation, so this succeeds even if the endpoint is
    /// unreachable.
    pub fn new(config: S3Config) -> StoreResult<Self> {
        let credentials = Credentials::new(
            config.access_key.as_deref(),
            config.secret_key.as_deref(),
            None,
            None,
            None,
        )
        .map_err(|err| StoreError::Config(format!("invalid credentials: {err}")))?;

        let scheme = if config.use_tls { "https" } else { "http" };
        let region = Region::Custom {
            region: config.region,
            endpoint: format!("{scheme}://{}", config.endpoint),
        };

        Ok(Self {
            region,
            credentials,
            path_style: config.path_style,
            request_timeout: config.request_timeout,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// Returns a handle for the bucket with the given name.
    fn bucket(&self, name: &str) -> StoreResult<Box<Bucket>> {
        let mut buckets = self.buckets.lock().unwrap();
        if let Some(bucket) = buckets.get(name) {
            return Ok(bucket.clone());
        }

        let mut bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|cause| StoreError::S3 {
                context: format!("invalid bucket `{name}`"),
                cause,
            })?;

        if self.path_style {
            bucket = bucket.with_path_style();
        }

        if let Some(request_timeout) = self.request_timeout {
            bucket = bucket
                .with_request_timeout(request_timeout)
                .map_err(|cause| StoreError::S3 {
                    context: "failed to apply request timeout".into(),
                    cause,
                })?;
        }

        buckets.insert(name.to_owned(), bucket.clone());
        Ok(bucket)
    }
}

/// Maps a client error into a [`StoreError`], keeping missing objects and buckets structured.
fn classify(err: S3Error, bucket: &str, key: Option<&str>, context: &str) -> StoreError {
    match err {
        S3Error::HttpFailWithBody(404, ref body) => {
            if error_code(body) == Some("NoSuchBucket") {
                return StoreError::BucketNotFound {
                    bucket: bucket.to_owned(),
                };
            }
            match key {
                Some(key) => StoreError::NotFound {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                },
                None => StoreError::BucketNotFound {
                    bucket: bucket.to_owned(),
                },
            }
        }
        S3Error::HttpFailWithBody(401 | 403, _) => StoreError::AccessDenied {
            bucket: bucket.to_owned(),
        },
        cause => StoreError::S3 {
            context: match key {
                Some(key) => format!("{context} `{bucket}/{key}`"),
                None => format!("{context} `{bucket}`"),
            },
            cause,
        },
    }
}

/// Extracts the `<Code>` element of an S3 XML error document.
fn error_code(body: &str) -> Option<&str> {
    let start = body.find("<Code>")? + "<Code>".len();
    let len = body[start..].find("</Code>")?;
    Some(&body[start..start + len])
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("endpoint", &self.region.endpoint())
            .field("region", &self.region.to_string())
            .field("path_style", &self.path_style)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &'static str {
        "s3-compatible"
    }

    #[tracing::instrument(level = "trace", skip(self, contents))]
    async fn put_object(&self, bucket: &str, key: &str, contents: Bytes) -> StoreResult<u64> {
        let handle = self.bucket(bucket)?;
        handle
            .put_object_with_content_type(key, &contents, CONTENT_TYPE)
            .await
            .map_err(|err| classify(err, bucket, Some(key), "failed to put"))?;

        Ok(contents.len() as u64)
    }

    /// Streams the object body.
    ///
    /// The response stream of `rust-s3` carries only the status code, so the announced size is
    /// not available here and `size` is always `None`. A body that ends before its
    /// `Content-Length` is still caught: the HTTP client fails the stream, and the drain reports
    /// it as an I/O error.
    #[tracing::instrument(level = "trace", skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<GetResponse> {
        let handle = self.bucket(bucket)?;
        let response = handle
            .get_object_stream(key)
            .await
            .map_err(|err| classify(err, bucket, Some(key), "failed to get"))?;

        if response.status_code == 404 {
            return Err(StoreError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }

        let stream = response
            .bytes
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();

        Ok(GetResponse { size: None, stream })
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<u64> {
        let handle = self.bucket(bucket)?;
        let (head, status) = handle
            .head_object(key)
            .await
            .map_err(|err| classify(err, bucket, Some(key), "failed to stat"))?;

        if status == 404 {
            return Err(StoreError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        }

        Ok(head.content_length.unwrap_or_default().max(0) as u64)
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        let handle = self.bucket(bucket)?;
        handle
            .exists()
            .await
            .map_err(|err| classify(err, bucket, None, "failed to check bucket"))
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        let region = self.region.clone();
        let credentials = self.credentials.clone();
        let config = BucketConfiguration::default();

        let result = if self.path_style {
            Bucket::create_with_path_style(bucket, region, credentials, config).await
        } else {
            Bucket::create(bucket, region, credentials, config).await
        };

        let response =
            result.map_err(|err| classify(err, bucket, None, "failed to create bucket"))?;
        if !response.success() {
            return Err(StoreError::generic(
                format!("failed to create bucket `{bucket}`"),
                response.response_text,
            ));
        }

        tracing::debug!(bucket, "created bucket");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> S3Config {
        S3Config {
            endpoint: "localhost:9000".into(),
            region: "par".into(),
            access_key: Some("access".into()),
            secret_key: Some("secret".into()),
            use_tls: false,
            path_style: true,
            request_timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn extracts_error_codes() {
        let body = "<?xml version=\"1.0\"?><Error><Code>NoSuchKey</Code>\
                    <Message>The specified key does not exist.</Message></Error>";
        assert_eq!(error_code(body), Some("NoSuchKey"));
        assert_eq!(error_code("<Error></Error>"), None);
        assert_eq!(error_code(""), None);
    }

    #[test]
    fn classifies_not_found() {
        let err = S3Error::HttpFailWithBody(404, "<Error><Code>NoSuchKey</Code></Error>".into());
        let err = classify(err, "reads", Some("s3-loadgen-1"), "failed to get");
        assert!(err.is_not_found());

        let err = S3Error::HttpFailWithBody(404, String::new());
        let err = classify(err, "reads", Some("s3-loadgen-1"), "failed to stat");
        assert!(err.is_not_found());
    }

    #[test]
    fn classifies_missing_bucket() {
        let err =
            S3Error::HttpFailWithBody(404, "<Error><Code>NoSuchBucket</Code></Error>".into());
        let err = classify(err, "reads", Some("s3-loadgen-1"), "failed to get");
        assert!(matches!(err, StoreError::BucketNotFound { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn classifies_access_denied() {
        let err = S3Error::HttpFailWithBody(403, String::new());
        let err = classify(err, "writes", Some("key"), "failed to put");
        assert!(matches!(err, StoreError::AccessDenied { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = S3Error::HttpFailWithBody(503, "<Error><Code>SlowDown</Code></Error>".into());
        let err = classify(err, "writes", Some("key"), "failed to put");
        assert!(!err.is_not_found());
        assert!(!err.is_fatal());
    }

    #[test]
    fn caches_bucket_handles() {
        let store = S3Store::new(make_config()).unwrap();
        let first = store.bucket("reads").unwrap();
        let second = store.bucket("reads").unwrap();
        assert_eq!(first.name(), second.name());
        assert_eq!(store.buckets.lock().unwrap().len(), 1);
    }

    #[test]
    fn debug_redacts_secret() {
        let debug = format!("{:?}", make_config());
        assert!(!debug.contains("\"secret\""));
        assert!(debug.contains("[redacted]"));
    }
}
