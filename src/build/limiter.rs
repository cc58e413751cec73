//! Global admission gate for generator processes.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::{BuildError, BuildResult};

/// Default number of generator processes allowed at once.
pub const DEFAULT_MAX_CONCURRENT_BUILDS: usize = 32;

/// Bounds how many generator processes run simultaneously.
///
/// Cheap to clone; clones share the same budget.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// A held slot. Dropping it releases the slot on every exit path.
#[derive(Debug)]
pub struct BuildPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Waits until a slot is free. Waiters are served in FIFO order.
    pub async fn acquire(&self) -> BuildResult<BuildPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BuildError::infrastructure("concurrency limiter closed"))?;
        Ok(BuildPermit { _permit: permit })
    }

    pub fn try_acquire(&self) -> Option<BuildPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| BuildPermit { _permit: permit })
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.max - self.available()
    }
}

impl Default for ConcurrencyLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_BUILDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let limiter = ConcurrencyLimiter::new(2);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_use(), 2);
        assert!(limiter.try_acquire().is_none());

        drop(a);
        assert_eq!(limiter.available(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_does_not_leak() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await.unwrap();
        let pending = tokio::time::timeout(Duration::from_millis(10), limiter.acquire()).await;
        assert!(pending.is_err());
        drop(held);
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        assert_eq!(ConcurrencyLimiter::new(0).max(), 1);
        assert_eq!(ConcurrencyLimiter::default().max(), 32);
    }
}
