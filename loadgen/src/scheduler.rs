//! Rate-controlled dispatch of operations.
//!
//! The [`Scheduler`] drives two independent periodic timers, one for writes and one for reads.
//! Every tick spawns its operation as a detached task, so the issue rate never depends on how
//! long the store takes to answer. The only coupling between completions and ticks is the
//! [`InFlightLimiter`]: a tick that finds no free slot is dropped and counted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::concurrency::InFlightLimiter;
use crate::executor::OperationKind;
use crate::metrics::MetricsRegistry;

/// Counts of what the scheduler did with its ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Write ticks that spawned an operation.
    pub writes_dispatched: u64,
    /// Write ticks that were skipped.
    pub writes_dropped: u64,
    /// Read ticks that spawned an operation.
    pub reads_dispatched: u64,
    /// Read ticks that were skipped.
    pub reads_dropped: u64,
    /// Operations still running when the shutdown timeout elapsed.
    pub abandoned: usize,
}

impl TickStats {
    fn record(&mut self, kind: OperationKind, dispatched: bool) {
        let counter = match (kind, dispatched) {
            (OperationKind::Write, true) => &mut self.writes_dispatched,
            (OperationKind::Write, false) => &mut self.writes_dropped,
            (OperationKind::Read, true) => &mut self.reads_dispatched,
            (OperationKind::Read, false) => &mut self.reads_dropped,
        };
        *counter += 1;
    }
}

/// Fires write and read operations at fixed rates.
#[derive(Debug)]
pub struct Scheduler {
    write_interval: Duration,
    read_interval: Duration,
    shutdown_timeout: Duration,
    limiter: InFlightLimiter,
    metrics: Arc<MetricsRegistry>,
}

impl Scheduler {
    /// Creates a scheduler ticking at the given intervals.
    ///
    /// Both intervals must be non-zero.
    pub fn new(
        write_interval: Duration,
        read_interval: Duration,
        limiter: InFlightLimiter,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            write_interval,
            read_interval,
            shutdown_timeout: Duration::ZERO,
            limiter,
            metrics,
        }
    }

    /// Sets how long in-flight operations may keep running after shutdown.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Runs until `shutdown` resolves.
    ///
    /// On every write tick `on_write` is called, and on every read tick `on_read`. A callback
    /// returns the operation to spawn, or `None` if there is nothing to do for this tick, which
    /// counts as a dropped tick. Callbacks are only invoked when a slot is free.
    ///
    /// After `shutdown` resolves no further ticks are dispatched. Operations still running are
    /// awaited for up to the shutdown timeout and then abandoned.
    pub async fn run<W, WF, R, RF, S>(
        &self,
        mut on_write: W,
        mut on_read: R,
        shutdown: S,
    ) -> TickStats
    where
        W: FnMut() -> Option<WF>,
        WF: Future<Output = ()> + Send + 'static,
        R: FnMut() -> Option<RF>,
        RF: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()>,
    {
        let start = Instant::now();
        let mut write_ticker =
            tokio::time::interval_at(start + self.write_interval, self.write_interval);
        write_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut read_ticker =
            tokio::time::interval_at(start + self.read_interval, self.read_interval);
        read_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut stats = TickStats::default();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = write_ticker.tick() => {
                    let dispatched = self.dispatch(OperationKind::Write, &mut on_write);
                    stats.record(OperationKind::Write, dispatched);
                }
                _ = read_ticker.tick() => {
                    let dispatched = self.dispatch(OperationKind::Read, &mut on_read);
                    stats.record(OperationKind::Read, dispatched);
                }
            }
        }

        tracing::info!(
            in_flight = self.limiter.in_flight(),
            "stopped scheduling, waiting for in-flight operations"
        );
        if tokio::time::timeout(self.shutdown_timeout, self.limiter.wait_idle())
            .await
            .is_err()
        {
            stats.abandoned = self.limiter.in_flight();
            tracing::warn!(
                abandoned = stats.abandoned,
                timeout = ?self.shutdown_timeout,
                "abandoning in-flight operations"
            );
        }

        stats
    }

    /// Spawns the operation for one tick. Returns `false` if the tick was dropped.
    fn dispatch<F, Fut>(&self, kind: OperationKind, make_operation: &mut F) -> bool
    where
        F: FnMut() -> Option<Fut>,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permit = match self.limiter.try_acquire() {
            Ok(permit) => permit,
            Err(err) => {
                tracing::debug!(%kind, %err, "dropping tick");
                self.metrics.record_dropped_tick(kind);
                return false;
            }
        };

        let Some(operation) = make_operation() else {
            tracing::debug!(%kind, "nothing to do, dropping tick");
            self.metrics.record_dropped_tick(kind);
            return false;
        };

        tokio::spawn(async move {
            operation.await;
            drop(permit);
        });
        true
    }
}
