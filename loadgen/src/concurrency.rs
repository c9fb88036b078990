//! Bound on the number of in-flight operations.
//!
//! Every dispatched write or read holds one slot of the [`InFlightLimiter`] until its store
//! request finishes. The scheduler never waits for a slot: a tick that finds the limiter at
//! capacity is dropped and counted, so a stalled store caps outstanding requests instead of
//! slowing the tick rate. At shutdown the scheduler drains the limiter with
//! [`InFlightLimiter::wait_idle`] and reports whatever still holds a slot as abandoned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// How often the in-flight gauge is reported.
pub const GAUGE_INTERVAL: Duration = Duration::from_secs(1);

/// Returned by [`InFlightLimiter::try_acquire`] when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{max} operations already in flight")]
pub struct AtCapacity {
    /// The configured bound.
    pub max: usize,
}

/// Caps the number of concurrently running operations.
///
/// Cloning yields a handle to the same set of slots.
#[derive(Clone, Debug)]
pub struct InFlightLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
    released: Arc<Notify>,
}

impl InFlightLimiter {
    /// Creates a limiter allowing `max` operations at once.
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
            released: Arc::new(Notify::new()),
        }
    }

    /// The configured bound.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Takes a slot without waiting.
    pub fn try_acquire(&self) -> Result<InFlightPermit, AtCapacity> {
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| AtCapacity { max: self.max })?;

        Ok(InFlightPermit {
            permit: Some(permit),
            released: Arc::clone(&self.released),
        })
    }

    /// Number of operations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.max - self.semaphore.available_permits()
    }

    /// Resolves once every slot has been returned.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.released.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Reports the in-flight count as a gauge every [`GAUGE_INTERVAL`].
    ///
    /// Runs until dropped.
    pub async fn report_in_flight(self) {
        let mut ticker = tokio::time::interval(GAUGE_INTERVAL);
        loop {
            ticker.tick().await;
            merni::gauge!("operations.in_flight": self.in_flight());
        }
    }
}

/// A slot held by one running operation.
///
/// Dropping the permit frees the slot and wakes [`InFlightLimiter::wait_idle`].
#[derive(Debug)]
pub struct InFlightPermit {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spawns an operation that holds a slot for `latency`, like a detached store request.
    fn spawn_operation(
        limiter: &InFlightLimiter,
        latency: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let permit = limiter.try_acquire().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            drop(permit);
        })
    }

    #[test]
    fn ticks_beyond_the_bound_are_refused() {
        let limiter = InFlightLimiter::new(2);
        assert_eq!(limiter.max(), 2);

        let first = limiter.try_acquire().unwrap();
        let _second = limiter.clone().try_acquire().unwrap();
        assert_eq!(limiter.in_flight(), 2);

        let err = limiter.try_acquire().unwrap_err();
        assert_eq!(err, AtCapacity { max: 2 });
        assert_eq!(err.to_string(), "2 operations already in flight");

        drop(first);
        assert_eq!(limiter.in_flight(), 1);
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn slot_frees_when_slow_operation_completes() {
        let limiter = InFlightLimiter::new(1);
        let slow = spawn_operation(&limiter, Duration::from_millis(300));

        // Ticks arriving while the store is slow are refused rather than queued.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(limiter.try_acquire().is_err());
        }

        slow.await.unwrap();
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_the_slowest_operation() {
        let limiter = InFlightLimiter::new(8);
        spawn_operation(&limiter, Duration::from_millis(20));
        spawn_operation(&limiter, Duration::from_millis(80));
        spawn_operation(&limiter, Duration::from_millis(40));
        assert_eq!(limiter.in_flight(), 3);

        let started = tokio::time::Instant::now();
        limiter.wait_idle().await;
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn drain_of_idle_limiter_is_immediate() {
        let limiter = InFlightLimiter::new(3);
        assert!(futures::poll!(Box::pin(limiter.wait_idle())).is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_operations_outlive_the_drain_timeout() {
        let limiter = InFlightLimiter::new(4);
        spawn_operation(&limiter, Duration::from_millis(10));
        let stalled = limiter.try_acquire().unwrap();

        let drained = tokio::time::timeout(Duration::from_secs(1), limiter.wait_idle()).await;
        assert!(drained.is_err());
        assert_eq!(limiter.in_flight(), 1);

        drop(stalled);
        limiter.wait_idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gauge_reporter_runs_until_aborted() {
        let limiter = InFlightLimiter::new(4);
        let _permit = limiter.try_acquire().unwrap();

        let reporter = tokio::spawn(limiter.clone().report_in_flight());
        tokio::time::sleep(GAUGE_INTERVAL * 3).await;
        assert!(!reporter.is_finished());

        reporter.abort();
        assert!(reporter.await.unwrap_err().is_cancelled());
        assert_eq!(limiter.in_flight(), 1);
    }
}
