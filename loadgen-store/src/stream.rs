//! Payload stream type and helpers.

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

/// Type alias for data streams returned by [`ObjectStore::get_object`](crate::ObjectStore::get_object).
pub type PayloadStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Creates a [`PayloadStream`] yielding the given bytes as a single chunk.
pub fn once(contents: Bytes) -> PayloadStream {
    tokio_stream::once(Ok(contents)).boxed()
}

/// Consumes a [`PayloadStream`] and returns the number of bytes it yielded.
///
/// The data itself is discarded.
pub async fn drain(mut stream: PayloadStream) -> std::io::Result<u64> {
    let mut total = 0;
    while let Some(chunk) = stream.next().await {
        total += chunk?.len() as u64;
    }
    Ok(total)
}
