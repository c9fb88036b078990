use thiserror::Error;

/// Errors reported by an [`ObjectStore`](crate::ObjectStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist in the bucket.
    #[error("object not found: {bucket}/{key}")]
    NotFound {
        /// The bucket that was queried.
        bucket: String,
        /// The key that was not found.
        key: String,
    },

    /// The bucket itself does not exist.
    #[error("bucket not found: {bucket}")]
    BucketNotFound {
        /// The missing bucket.
        bucket: String,
    },

    /// The store rejected the credentials for the bucket.
    #[error("access denied to bucket: {bucket}")]
    AccessDenied {
        /// The bucket that was accessed.
        bucket: String,
    },

    /// IO errors related to payload streaming.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors returned by the S3 client, including non-success HTTP responses.
    #[error("s3 error: {context}")]
    S3 {
        /// What the store was doing when the error occurred.
        context: String,
        /// The underlying client error.
        #[source]
        cause: s3::error::S3Error,
    },

    /// The store was configured with values it cannot work with, such as malformed credentials.
    #[error("invalid store configuration: {0}")]
    Config(String),

    /// Any other error stemming from a store implementation.
    #[error("storage backend error: {context}")]
    Generic {
        /// What the store was doing when the error occurred.
        context: String,
        /// The underlying error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StoreError {
    /// Creates a [`StoreError::Generic`] from a context message and any error.
    pub fn generic(
        context: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Generic {
            context: context.into(),
            cause: cause.into(),
        }
    }

    /// Returns `true` if the error signals a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if retrying the same request can never succeed.
    ///
    /// Fatal errors indicate that the store is not usable at all, for instance because a bucket is
    /// missing or the configuration is invalid. Everything else is treated as transient.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BucketNotFound { .. } | Self::AccessDenied { .. } | Self::Config(_)
        )
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
