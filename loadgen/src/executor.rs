//! Execution and classification of single store operations.
//!
//! The [`Executor`] performs exactly one attempt per call. It never retries: the next scheduler
//! tick is the retry.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use loadgen_store::{GetResponse, SharedStore, StoreError, stream};

use crate::metrics::MetricsRegistry;

/// The kind of a store operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum OperationKind {
    /// A put into the write bucket.
    Write,
    /// A get from the read bucket.
    Read,
}

impl OperationKind {
    /// Returns the lowercase name used in logs and metric tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Write => "write",
            OperationKind::Read => "read",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classified result of one operation attempt.
#[derive(Debug)]
pub enum Outcome {
    /// The operation completed.
    Success {
        /// Bytes written or read.
        bytes: u64,
        /// Time spent in the store call, including the full transfer for reads.
        duration: Duration,
    },
    /// The object to read does not exist.
    Miss {
        /// The key that was not found.
        key: String,
    },
    /// The operation failed for any other reason.
    TransientError {
        /// The store error.
        cause: StoreError,
    },
}

impl Outcome {
    /// Returns `true` for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Returns `true` for [`Outcome::Miss`].
    pub fn is_miss(&self) -> bool {
        matches!(self, Outcome::Miss { .. })
    }

    /// Returns `true` for [`Outcome::TransientError`].
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::TransientError { .. })
    }
}

/// Bookkeeping for one finished operation.
///
/// Records only live until their outcome has been logged and counted.
struct OperationRecord<'a> {
    kind: OperationKind,
    key: &'a str,
    started_at: Instant,
    outcome: &'a Outcome,
}

impl OperationRecord<'_> {
    fn finish(self, metrics: &MetricsRegistry) {
        let Self {
            kind,
            key,
            started_at,
            outcome,
        } = self;

        match outcome {
            Outcome::Success { bytes, duration } => {
                metrics.record_success(kind, *bytes, *duration);
                tracing::debug!(
                    %kind,
                    key,
                    bytes,
                    seconds = duration.as_secs_f64(),
                    "operation completed"
                );
            }
            Outcome::Miss { .. } => {
                metrics.record_miss();
                tracing::debug!(%kind, key, "object is missing in read bucket");
            }
            Outcome::TransientError { cause } => {
                metrics.record_error(kind);
                tracing::error!(
                    error = cause as &dyn std::error::Error,
                    %kind,
                    key,
                    elapsed = ?started_at.elapsed(),
                    "operation failed"
                );
            }
        }
    }
}

/// Performs single store operations and records their outcome.
#[derive(Clone, Debug)]
pub struct Executor {
    store: SharedStore,
    metrics: Arc<MetricsRegistry>,
}

impl Executor {
    /// Creates an executor that issues operations against `store` and records into `metrics`.
    pub fn new(store: SharedStore, metrics: Arc<MetricsRegistry>) -> Self {
        Self { store, metrics }
    }

    /// The registry this executor records into.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Writes `payload` to `key`.
    ///
    /// Only the put itself is timed. Failures are [`Outcome::TransientError`].
    pub async fn execute_write(&self, bucket: &str, key: &str, payload: Bytes) -> Outcome {
        self.metrics.record_attempt(OperationKind::Write);

        let started_at = Instant::now();
        let result = self.store.put_object(bucket, key, payload).await;
        let duration = started_at.elapsed();

        let outcome = match result {
            Ok(bytes) => Outcome::Success { bytes, duration },
            Err(cause) => Outcome::TransientError { cause },
        };

        OperationRecord {
            kind: OperationKind::Write,
            key,
            started_at,
            outcome: &outcome,
        }
        .finish(&self.metrics);

        outcome
    }

    /// Reads `key` and drains its contents.
    ///
    /// The latency covers the request and the complete transfer. A missing object is an
    /// [`Outcome::Miss`]. Any other failure, including one while draining the stream or a stream
    /// shorter than announced, is an [`Outcome::TransientError`].
    pub async fn execute_read(&self, bucket: &str, key: &str) -> Outcome {
        self.metrics.record_attempt(OperationKind::Read);

        let started_at = Instant::now();
        let outcome = match self.store.get_object(bucket, key).await {
            Ok(GetResponse { size, stream }) => match stream::drain(stream).await {
                Ok(bytes) if size.is_none_or(|size| size == bytes) => Outcome::Success {
                    bytes,
                    duration: started_at.elapsed(),
                },
                Ok(bytes) => Outcome::TransientError {
                    cause: io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("read {bytes} of {} announced bytes", size.unwrap_or_default()),
                    )
                    .into(),
                },
                Err(err) => Outcome::TransientError { cause: err.into() },
            },
            Err(cause) if cause.is_not_found() => Outcome::Miss {
                key: key.to_owned(),
            },
            Err(cause) => Outcome::TransientError { cause },
        };

        OperationRecord {
            kind: OperationKind::Read,
            key,
            started_at,
            outcome: &outcome,
        }
        .finish(&self.metrics);

        outcome
    }
}
