//! The set of keys that reads are sampled from.
//!
//! The corpus consists of the keys `{prefix}-1` through `{prefix}-{size}`. They are written once
//! during warm-up and only read afterwards. Reads sample from all configured keys, including the
//! ones whose warm-up write failed: reading those yields a miss, which is exactly the signal the
//! load generator is supposed to report.

use std::future::Future;

use loadgen_store::{StoreError, StoreResult};
use rand::Rng;
use thiserror::Error;

use crate::metrics::MetricsRegistry;

/// Error returned when the corpus cannot be populated at all.
#[derive(Debug, Error)]
pub enum PopulateError {
    /// The store rejected a write in a way that makes every further write pointless.
    #[error("failed to write corpus object `{key}`")]
    Fatal {
        /// The key whose write failed.
        key: String,
        /// The store error.
        #[source]
        cause: StoreError,
    },
}

/// Result of populating the corpus.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PopulateSummary {
    /// Objects that were written.
    pub written: u64,
    /// Objects whose write failed.
    pub failed: u64,
}

/// The read corpus.
#[derive(Clone, Debug)]
pub struct Corpus {
    prefix: String,
    size: u64,
}

impl Corpus {
    /// Creates a corpus of `size` keys named `{prefix}-{id}`.
    pub fn new(prefix: impl Into<String>, size: u64) -> Self {
        Self {
            prefix: prefix.into(),
            size,
        }
    }

    /// The configured number of keys.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns `true` if the corpus has no keys to read.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the key of the object with the given identifier.
    pub fn key(&self, id: u64) -> String {
        format!("{}-{id}", self.prefix)
    }

    /// Samples an identifier uniformly from `1..=size`.
    ///
    /// Returns `None` for an empty corpus.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u64> {
        if self.is_empty() {
            return None;
        }
        Some(rng.random_range(1..=self.size))
    }

    /// Samples a key, see [`sample`](Self::sample).
    pub fn sample_key<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<String> {
        self.sample(rng).map(|id| self.key(id))
    }

    /// Writes every corpus object by calling `write` with its identifier and key, in order.
    ///
    /// Individual failures are logged and counted, and population continues with the next
    /// identifier. Only a fatal store error aborts population.
    pub async fn populate<F, Fut>(
        &self,
        metrics: &MetricsRegistry,
        mut write: F,
    ) -> Result<PopulateSummary, PopulateError>
    where
        F: FnMut(u64, String) -> Fut,
        Fut: Future<Output = StoreResult<u64>>,
    {
        tracing::info!(size = self.size, "populating read corpus");

        let mut summary = PopulateSummary::default();
        for id in 1..=self.size {
            let key = self.key(id);
            match write(id, key.clone()).await {
                Ok(bytes) => {
                    tracing::debug!(key, bytes, "corpus object stored");
                    metrics.record_warmup(true);
                    summary.written += 1;
                }
                Err(cause) if cause.is_fatal() => {
                    metrics.record_warmup(false);
                    return Err(PopulateError::Fatal { key, cause });
                }
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        key,
                        "failed to store corpus object"
                    );
                    metrics.record_warmup(false);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            written = summary.written,
            failed = summary.failed,
            "read corpus populated"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn keys_are_sequential() {
        let corpus = Corpus::new("s3-loadgen", 3);
        assert_eq!(corpus.size(), 3);
        assert_eq!(corpus.key(1), "s3-loadgen-1");
        assert_eq!(corpus.key(3), "s3-loadgen-3");
    }

    #[test]
    fn samples_stay_in_range_and_cover_all_ids() {
        let corpus = Corpus::new("k", 10);
        let mut rng = SmallRng::seed_from_u64(42);

        let seen: BTreeSet<u64> = (0..10_000)
            .map(|_| corpus.sample(&mut rng).unwrap())
            .collect();

        assert_eq!(seen, (1..=10).collect());
    }

    #[test]
    fn single_key_corpus_always_samples_it() {
        let corpus = Corpus::new("k", 1);
        let mut rng = SmallRng::seed_from_u64(0);
        for _ in 0..1000 {
            assert_eq!(corpus.sample(&mut rng), Some(1));
        }
        assert_eq!(corpus.sample_key(&mut rng).as_deref(), Some("k-1"));
    }

    #[test]
    fn empty_corpus_has_nothing_to_sample() {
        let corpus = Corpus::new("k", 0);
        assert!(corpus.is_empty());
        assert_eq!(corpus.sample(&mut rand::rng()), None);
    }

    #[tokio::test]
    async fn populate_writes_every_key_in_order() {
        let corpus = Corpus::new("k", 5);
        let metrics = MetricsRegistry::new();
        let mut written = Vec::new();

        let summary = corpus
            .populate(&metrics, |id, key| {
                written.push((id, key));
                async { Ok(16) }
            })
            .await
            .unwrap();

        assert_eq!(summary, PopulateSummary { written: 5, failed: 0 });
        assert_eq!(written.len(), 5);
        assert_eq!(written[0], (1, "k-1".to_owned()));
        assert_eq!(written[4], (5, "k-5".to_owned()));
        assert_eq!(metrics.warmup.writes.get(), 5);
    }

    #[tokio::test]
    async fn populate_continues_after_transient_failures() {
        let corpus = Corpus::new("k", 6);
        let metrics = MetricsRegistry::new();
        let mut attempted = Vec::new();

        let summary = corpus
            .populate(&metrics, |id, _key| {
                attempted.push(id);
                async move {
                    if id % 2 == 0 {
                        Err(StoreError::generic("put", "connection reset"))
                    } else {
                        Ok(1)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(summary, PopulateSummary { written: 3, failed: 3 });
        assert_eq!(attempted, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(metrics.warmup.failures.get(), 3);
    }

    #[tokio::test]
    async fn populate_aborts_on_fatal_errors() {
        let corpus = Corpus::new("k", 10);
        let metrics = MetricsRegistry::new();
        let mut attempts = 0;

        let err = corpus
            .populate(&metrics, |_id, _key| {
                attempts += 1;
                async {
                    Err(StoreError::BucketNotFound {
                        bucket: "reads".into(),
                    })
                }
            })
            .await
            .unwrap_err();

        let PopulateError::Fatal { key, cause } = err;
        assert_eq!(key, "k-1");
        assert!(cause.is_fatal());
        assert_eq!(attempts, 1);
    }
}
