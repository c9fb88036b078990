use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::PayloadStream;
use crate::error::StoreResult;

/// A shared, type-erased [`ObjectStore`] instance.
///
/// Stores are safe for concurrent use, so a single instance is shared by every in-flight
/// operation.
pub type SharedStore = Arc<dyn ObjectStore>;

/// The response of [`ObjectStore::get_object`].
pub struct GetResponse {
    /// The content length announced by the store, if any.
    pub size: Option<u64>,
    /// The object contents.
    pub stream: PayloadStream,
}

impl fmt::Debug for GetResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetResponse")
            .field("size", &self.size)
            .field("stream", &format_args!("[Stream]"))
            .finish()
    }
}

/// The subset of an object store API the load generator drives.
#[async_trait::async_trait]
pub trait ObjectStore: fmt::Debug + Send + Sync + 'static {
    /// The store name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Stores `contents` under `key`, returning the number of bytes the store accepted.
    async fn put_object(&self, bucket: &str, key: &str, contents: Bytes) -> StoreResult<u64>;

    /// Retrieves the object at `key` as a stream.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if the object does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<GetResponse>;

    /// Returns the size of the object at `key`.
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) if the object does not exist.
    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<u64>;

    /// Checks whether `bucket` exists.
    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    /// Creates `bucket`.
    async fn create_bucket(&self, bucket: &str) -> StoreResult<()>;
}
