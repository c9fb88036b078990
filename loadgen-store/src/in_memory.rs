//! In-memory store for tests.
//!
//! This provides an [`ObjectStore`] backed by a `HashMap`, removing the need for a running object
//! store in tests. The store is [`Clone`] so tests can hold a handle for direct inspection while
//! the engine owns a shared copy.
//!
//! Faults can be injected per key or for all requests to simulate backend failures.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;

use crate::error::{StoreError, StoreResult};
use crate::store::{GetResponse, ObjectStore};

type Objects = HashMap<(String, String), Bytes>;

/// A failure mode that [`InMemoryStore`] can inject into requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Fault {
    /// The request fails with a generic backend error.
    Unavailable,
    /// Reads find the object, but the stream breaks after the first chunk.
    ///
    /// Writes fail with an I/O error.
    BrokenStream,
    /// The request never completes.
    Hang,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashSet<String>,
    objects: Objects,
    key_faults: HashMap<String, Fault>,
    global_fault: Option<Fault>,
    latency: Duration,
}

/// An [`ObjectStore`] keeping all objects in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates an empty store without any buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already contains the given buckets.
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store
            .state
            .lock()
            .unwrap()
            .buckets
            .extend(buckets.into_iter().map(Into::into));
        store
    }

    /// Delays every request by `latency` before it is processed.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Injects `fault` into every request targeting `key`, in any bucket.
    pub fn fail_key(&self, key: impl Into<String>, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .key_faults
            .insert(key.into(), fault);
    }

    /// Injects `fault` into every request.
    pub fn fail_all(&self, fault: Fault) {
        self.state.lock().unwrap().global_fault = Some(fault);
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        let mut state = self.state.lock().unwrap();
        state.key_faults.clear();
        state.global_fault = None;
    }

    /// Returns `true` if the object exists.
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(bucket.to_owned(), key.to_owned()))
    }

    /// Returns the number of objects stored in `bucket`.
    pub fn object_count(&self, bucket: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .count()
    }

    /// Removes an object directly, bypassing the [`ObjectStore`] trait.
    ///
    /// Useful for simulating objects that vanish from the backend.
    pub fn remove(&self, bucket: &str, key: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&(bucket.to_owned(), key.to_owned()));
    }

    /// Waits for the configured latency and resolves the fault for `key`.
    async fn enter(&self, bucket: &str, key: Option<&str>) -> StoreResult<Option<Fault>> {
        let (latency, fault, bucket_exists) = {
            let state = self.state.lock().unwrap();
            let fault = key
                .and_then(|key| state.key_faults.get(key).copied())
                .or(state.global_fault);
            (state.latency, fault, state.buckets.contains(bucket))
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match fault {
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Unavailable) => Err(StoreError::generic(
                "injected fault",
                "store unavailable",
            )),
            _ if key.is_some() && !bucket_exists => Err(StoreError::BucketNotFound {
                bucket: bucket.to_owned(),
            }),
            fault => Ok(fault),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn put_object(&self, bucket: &str, key: &str, contents: Bytes) -> StoreResult<u64> {
        if let Some(Fault::BrokenStream) = self.enter(bucket, Some(key)).await? {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "upload interrupted").into());
        }

        let size = contents.len() as u64;
        self.state
            .lock()
            .unwrap()
            .objects
            .insert((bucket.to_owned(), key.to_owned()), contents);
        Ok(size)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<GetResponse> {
        let fault = self.enter(bucket, Some(key)).await?;

        let entry = self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned();
        let Some(contents) = entry else {
            return Err(StoreError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            });
        };

        let size = Some(contents.len() as u64);
        let stream = if fault == Some(Fault::BrokenStream) {
            let half = contents.slice(..contents.len() / 2);
            futures_util::stream::iter([
                Ok(half),
                Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset while streaming",
                )),
            ])
            .boxed()
        } else {
            crate::stream::once(contents)
        };

        Ok(GetResponse { size, stream })
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> StoreResult<u64> {
        self.enter(bucket, Some(key)).await?;

        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|contents| contents.len() as u64)
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            })
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        self.enter(bucket, None).await?;
        Ok(self.state.lock().unwrap().buckets.contains(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> StoreResult<()> {
        self.enter(bucket, None).await?;
        self.state
            .lock()
            .unwrap()
            .buckets
            .insert(bucket.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::stream::drain;

    use super::*;

    fn make_store() -> InMemoryStore {
        InMemoryStore::with_buckets(["reads"])
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = make_store();

        let size = store
            .put_object("reads", "the_key", Bytes::from_static(b"oh hai!"))
            .await
            .unwrap();
        assert_eq!(size, 7);
        assert!(store.contains("reads", "the_key"));

        let response = store.get_object("reads", "the_key").await.unwrap();
        assert_eq!(response.size, Some(7));
        assert_eq!(drain(response.stream).await.unwrap(), 7);

        assert_eq!(store.stat_object("reads", "the_key").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = make_store();

        let err = store.get_object("reads", "missing").await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.stat_object("reads", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn missing_bucket_is_fatal() {
        let store = InMemoryStore::new();

        let err = store
            .put_object("nope", "key", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        assert!(!store.bucket_exists("nope").await.unwrap());
        store.create_bucket("nope").await.unwrap();
        assert!(store.bucket_exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn key_fault_only_hits_that_key() {
        let store = make_store();
        store.fail_key("bad", Fault::Unavailable);

        let err = store
            .put_object("reads", "bad", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(!err.is_not_found());
        assert!(!store.contains("reads", "bad"));

        store
            .put_object("reads", "good", Bytes::from_static(b"x"))
            .await
            .unwrap();

        store.clear_faults();
        store
            .put_object("reads", "bad", Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn broken_stream_fails_while_draining() {
        let store = make_store();
        store
            .put_object("reads", "key", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        store.fail_key("key", Fault::BrokenStream);

        let response = store.get_object("reads", "key").await.unwrap();
        let err = drain(response.stream).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_requests() {
        let store = make_store();
        store.set_latency(Duration::from_millis(50));

        let start = tokio::time::Instant::now();
        store
            .put_object("reads", "key", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn hang_never_completes() {
        let store = make_store();
        store.fail_all(Fault::Hang);

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            store.get_object("reads", "key"),
        )
        .await;
        assert!(result.is_err());
    }
}
