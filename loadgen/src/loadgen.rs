//! The lifecycle of one load generation run.
//!
//! A run prepares both buckets, populates the read corpus, and then ticks until shutdown is
//! requested. Preparing and populating are fatal: if the store cannot be reached or refuses the
//! buckets, load generation never starts. Once ticking, every failure is counted and the run goes
//! on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use loadgen_store::{InMemoryStore, S3Store, SharedStore};
use rand::Rng;
use tokio::sync::oneshot;

use crate::concurrency::InFlightLimiter;
use crate::config::{Config, Storage, WarmupMode, Workload};
use crate::corpus::{Corpus, PopulateError, PopulateSummary};
use crate::executor::Executor;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::payload::PayloadGenerator;
use crate::report;
use crate::scheduler::{Scheduler, TickStats};

/// Largest random identifier of a steady-state write key.
const MAX_WRITE_ID: u64 = 9_999_999_999;

/// Creates the store described by the configuration.
pub fn create_store(storage: &Storage) -> Result<SharedStore> {
    let store: SharedStore = match storage.s3_config() {
        Some(s3_config) => {
            Arc::new(S3Store::new(s3_config).context("failed to configure S3 store")?)
        }
        None => Arc::new(InMemoryStore::new()),
    };

    tracing::info!(store = store.name(), "using object store");
    Ok(store)
}

/// What happened during a completed run.
#[derive(Debug)]
pub struct RunSummary {
    /// Final values of all metrics.
    pub metrics: MetricsSnapshot,
    /// What the scheduler did with its ticks.
    pub ticks: TickStats,
    /// How long load was generated, excluding blocking warm-up.
    pub duration: Duration,
    /// The corpus population result, unless population was still running at shutdown.
    pub warmup: Option<PopulateSummary>,
}

/// Generates load against one store.
#[derive(Debug)]
pub struct LoadGenerator {
    store: SharedStore,
    write_bucket: Arc<str>,
    read_bucket: Arc<str>,
    workload: Workload,
    report_interval: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl LoadGenerator {
    /// Creates a load generator for `store` using the given configuration.
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            write_bucket: config.buckets.write.as_str().into(),
            read_bucket: config.buckets.read.as_str().into(),
            workload: config.workload.clone(),
            report_interval: config.metrics.report_interval,
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// The registry that all operations of this generator record into.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    fn corpus(&self) -> Corpus {
        Corpus::new(self.workload.key_prefix.as_str(), self.workload.corpus_size)
    }

    fn payload(&self) -> PayloadGenerator {
        PayloadGenerator::new(self.workload.payload_size.as_u64() as usize)
    }

    /// Makes sure both buckets exist, creating them if needed.
    pub async fn prepare_buckets(&self) -> Result<()> {
        for bucket in [&*self.write_bucket, &*self.read_bucket] {
            let exists = self
                .store
                .bucket_exists(bucket)
                .await
                .with_context(|| format!("failed to check bucket `{bucket}`"))?;

            if exists {
                tracing::info!(bucket, "bucket exists");
                continue;
            }

            self.store
                .create_bucket(bucket)
                .await
                .with_context(|| format!("failed to create bucket `{bucket}`"))?;
            tracing::info!(bucket, "created bucket");
        }

        Ok(())
    }

    /// Prepares the buckets and writes the whole read corpus.
    pub async fn populate(&self) -> Result<PopulateSummary> {
        self.prepare_buckets().await?;

        let summary = populate_corpus(
            &self.store,
            &self.read_bucket,
            &self.corpus(),
            self.payload(),
            &self.metrics,
        )
        .await?;
        Ok(summary)
    }

    /// Runs until `shutdown` resolves.
    ///
    /// Fails if the buckets cannot be prepared, or if the store refuses corpus writes outright.
    pub async fn run<S>(&self, shutdown: S) -> Result<RunSummary>
    where
        S: Future<Output = ()>,
    {
        self.prepare_buckets().await?;

        let corpus = Arc::new(self.corpus());
        let payload = self.payload();

        let (mut warmup, warmup_task, warmup_failed) = match self.workload.warmup {
            WarmupMode::Blocking => {
                let summary = populate_corpus(
                    &self.store,
                    &self.read_bucket,
                    &corpus,
                    payload,
                    &self.metrics,
                )
                .await?;
                (Some(summary), None, None)
            }
            WarmupMode::Concurrent => {
                let (failed_tx, failed_rx) = oneshot::channel();
                let store = Arc::clone(&self.store);
                let bucket = Arc::clone(&self.read_bucket);
                let corpus = Arc::clone(&corpus);
                let metrics = Arc::clone(&self.metrics);

                let task = tokio::spawn(async move {
                    let result = populate_corpus(&store, &bucket, &corpus, payload, &metrics).await;
                    if result.is_err() {
                        failed_tx.send(()).ok();
                    }
                    result
                });
                (None, Some(task), Some(failed_rx))
            }
        };

        let limiter = InFlightLimiter::new(self.workload.max_in_flight);
        let gauge = tokio::spawn(limiter.clone().report_in_flight());
        let progress = tokio::spawn(report_progress(
            Arc::clone(&self.metrics),
            self.report_interval,
        ));

        let executor = Executor::new(Arc::clone(&self.store), Arc::clone(&self.metrics));
        let on_write = || {
            let id = rand::rng().random_range(1..=MAX_WRITE_ID);
            let key = format!("{}-{id}", self.workload.key_prefix);
            let bucket = Arc::clone(&self.write_bucket);
            let executor = executor.clone();
            Some(async move {
                let contents = payload.generate();
                executor.execute_write(&bucket, &key, contents).await;
            })
        };
        let on_read = || {
            let key = corpus.sample_key(&mut rand::rng())?;
            let bucket = Arc::clone(&self.read_bucket);
            let executor = executor.clone();
            Some(async move {
                executor.execute_read(&bucket, &key).await;
            })
        };

        let shutdown = async move {
            match warmup_failed {
                Some(failed) => tokio::select! {
                    _ = shutdown => {},
                    Ok(()) = failed => tracing::warn!("corpus population failed, stopping"),
                },
                None => shutdown.await,
            }
        };

        tracing::info!(
            write_interval = ?self.workload.write_interval,
            read_interval = ?self.workload.read_interval,
            max_in_flight = limiter.max(),
            "generating load"
        );

        let started = tokio::time::Instant::now();
        let ticks = Scheduler::new(
            self.workload.write_interval,
            self.workload.read_interval,
            limiter,
            Arc::clone(&self.metrics),
        )
        .with_shutdown_timeout(self.workload.shutdown_timeout)
        .run(on_write, on_read, shutdown)
        .await;
        let duration = started.elapsed();

        gauge.abort();
        progress.abort();

        if let Some(task) = warmup_task {
            if !task.is_finished() {
                tracing::warn!("shutdown before the read corpus was fully populated");
                task.abort();
            }
            match task.await {
                Ok(result) => warmup = Some(result?),
                Err(err) if err.is_cancelled() => {}
                Err(err) => return Err(err).context("corpus population panicked"),
            }
        }

        let metrics = self.metrics.snapshot();
        tracing::info!(?ticks, "load generation finished");
        Ok(RunSummary {
            metrics,
            ticks,
            duration,
            warmup,
        })
    }
}

async fn populate_corpus(
    store: &SharedStore,
    bucket: &str,
    corpus: &Corpus,
    payload: PayloadGenerator,
    metrics: &MetricsRegistry,
) -> Result<PopulateSummary, PopulateError> {
    corpus
        .populate(metrics, move |_id, key| async move {
            store.put_object(bucket, &key, payload.generate()).await
        })
        .await
}

/// Logs a summary of the metrics every `interval`.
async fn report_progress(metrics: Arc<MetricsRegistry>, interval: Duration) {
    let start = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval_at(start + interval, interval);
    loop {
        ticker.tick().await;
        report::log_progress(&metrics.snapshot());
    }
}
