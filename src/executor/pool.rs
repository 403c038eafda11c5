//! Bounded worker pool for exchange execution.
//!
//! # Design Decisions
//! - A semaphore bounds concurrently executing exchanges
//! - Exchanges run on tokio's blocking pool: decoding and handlers may block
//! - Waiting for a permit is bounded by `queue_timeout`; past it the
//!   exchange is shed and the host answers 503
//! - `drain` waits for every permit, which is how shutdown waits for
//!   in-flight exchanges

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::observability::metrics;

use super::pipeline::Executor;
use super::raw::RawExchange;

/// Why an exchange could not be submitted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("no worker became available within {0:?}")]
    Shed(Duration),
    #[error("worker pool is shut down")]
    Closed,
}

/// Counters for a worker pool.
#[derive(Debug, Default)]
pub struct WorkerPoolMetrics {
    /// Exchanges rejected because no worker became available in time
    pub shed_count: AtomicU64,
    /// Exchanges currently executing
    pub in_flight: AtomicUsize,
    /// Total exchanges dispatched
    pub dispatched_count: AtomicU64,
    /// Total exchanges finished
    pub completed_count: AtomicU64,
}

impl WorkerPoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_shed(&self) {
        self.shed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatched_count.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_in_flight(now);
    }

    pub fn record_completion(&self) {
        self.completed_count.fetch_add(1, Ordering::Relaxed);
        let now = self.in_flight.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_in_flight(now);
    }

    pub fn get_shed_count(&self) -> u64 {
        self.shed_count.load(Ordering::Relaxed)
    }

    pub fn get_in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn get_dispatched_count(&self) -> u64 {
        self.dispatched_count.load(Ordering::Relaxed)
    }

    pub fn get_completed_count(&self) -> u64 {
        self.completed_count.load(Ordering::Relaxed)
    }
}

/// Releases the permit and records completion, even if execution panicked.
struct InFlight {
    metrics: Arc<WorkerPoolMetrics>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics.record_completion();
    }
}

/// Runs [`Executor::execute`] for submitted exchanges.
pub struct WorkerPool {
    executor: Arc<Executor>,
    permits: Arc<Semaphore>,
    capacity: usize,
    queue_timeout: Option<Duration>,
    metrics: Arc<WorkerPoolMetrics>,
}

impl WorkerPool {
    pub fn new(executor: Arc<Executor>, config: &WorkerConfig) -> Self {
        let capacity = config.max_concurrent_exchanges.max(1);
        Self {
            executor,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            queue_timeout: config.queue_timeout(),
            metrics: Arc::new(WorkerPoolMetrics::new()),
        }
    }

    /// Wait for a worker, then run the exchange on the blocking pool.
    pub async fn submit(&self, raw: RawExchange) -> Result<JoinHandle<()>, SubmitError> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        let permit = match self.queue_timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(permit) => permit,
                Err(_) => {
                    self.metrics.record_shed();
                    tracing::warn!(
                        exchange_id = %raw.state.id(),
                        waited_ms = limit.as_millis() as u64,
                        "Worker pool saturated, shedding exchange"
                    );
                    return Err(SubmitError::Shed(limit));
                }
            },
            None => acquire.await,
        }
        .map_err(|_| SubmitError::Closed)?;

        self.metrics.record_dispatch();
        let guard = InFlight {
            metrics: Arc::clone(&self.metrics),
            _permit: permit,
        };
        let executor = Arc::clone(&self.executor);
        Ok(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            executor.execute(raw);
        }))
    }

    /// Stop accepting work and wait for in-flight exchanges.
    /// Returns false if the deadline passed first.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let all = Arc::clone(&self.permits).acquire_many_owned(self.capacity as u32);
        let drained = match tokio::time::timeout(deadline, all).await {
            Ok(Ok(_permits)) => true,
            Ok(Err(_)) => true,
            Err(_) => false,
        };
        self.permits.close();
        tracing::info!(
            drained,
            in_flight = self.metrics.get_in_flight(),
            "Worker pool drained"
        );
        drained
    }

    pub fn metrics(&self) -> &Arc<WorkerPoolMetrics> {
        &self.metrics
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.metrics.get_in_flight())
            .finish_non_exhaustive()
    }
}
