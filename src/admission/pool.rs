//! Bounded permit pool.
//!
//! # Responsibilities
//! - Hold a fixed number of permits chosen at construction
//! - Hand out permits without blocking (`try_acquire`) or by waiting (`acquire`)
//! - Return a permit to the pool when its guard is dropped
//! - Publish occupancy to the `gate_pool_occupancy` gauge on every change
//!
//! # Design Decisions
//! - Backed by a `tokio::sync::Semaphore`, never closed
//! - Release only exists as `Drop` of [`Permit`], so a release without a
//!   matching acquire cannot be written
//! - A capacity of zero is valid: every `try_acquire` fails

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

/// Largest capacity a pool can be built with.
pub const MAX_CAPACITY: usize = Semaphore::MAX_PERMITS;

/// A fixed-capacity counting resource shared between request tasks.
#[derive(Debug, Clone)]
pub struct PermitPool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl PermitPool {
    /// Create a pool holding `capacity` permits.
    ///
    /// # Panics
    ///
    /// If `capacity` exceeds [`MAX_CAPACITY`]. Config-driven callers go
    /// through validation first.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a permit if one is free right now.
    ///
    /// Never waits and has no side effect when the pool is exhausted.
    pub fn try_acquire(&self) -> Option<Permit> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.granted(permit))
    }

    /// Wait until a permit is free and take it.
    ///
    /// Cancel-safe: dropping the returned future before it resolves leaves
    /// the pool exactly as it was, which is what lets it sit in a `select!`
    /// next to a deadline and a cancellation signal.
    pub async fn acquire(&self) -> Permit {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("permit pool semaphore is never closed");

        self.granted(permit)
    }

    fn granted(&self, permit: OwnedSemaphorePermit) -> Permit {
        self.record_occupancy();
        Permit {
            pool: self.clone(),
            permit: Some(permit),
        }
    }

    fn record_occupancy(&self) {
        metrics::record_occupancy(self.name, self.occupancy());
    }

    /// Pool name, used as the `pool` label in logs and metrics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Total number of permits.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Permits currently held.
    pub fn occupancy(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

/// A held slot in a [`PermitPool`].
///
/// The slot goes back to the pool when this guard is dropped, including
/// during unwinding or when the owning future is dropped mid-flight.
#[derive(Debug)]
pub struct Permit {
    pool: PermitPool,
    permit: Option<OwnedSemaphorePermit>,
}

impl Permit {
    /// Name of the pool this permit belongs to.
    pub fn pool(&self) -> &'static str {
        self.pool.name()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        // release first so the gauge sees the freed slot
        drop(self.permit.take());
        self.pool.record_occupancy();
    }
}
