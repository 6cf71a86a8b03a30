//! Fail-fast concurrency ceilings.
//!
//! Used for per-filter limits and per-origin in-flight limits. Exceeding the
//! ceiling never queues: `try_acquire` returns `None` and the caller turns that
//! into an admission error.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Counts in-flight work against a fixed ceiling.
#[derive(Debug)]
pub struct ConcurrencyLimiter {
    name: String,
    limit: usize,
    slots: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    pub fn new(name: impl Into<String>, limit: usize) -> Arc<Self> {
        let limit = limit.min(Semaphore::MAX_PERMITS);
        Arc::new(Self {
            name: name.into(),
            limit,
            slots: Arc::new(Semaphore::new(limit)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn in_flight(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    /// Take a slot, or `None` if the ceiling is already reached.
    pub fn try_acquire(&self) -> Option<ConcurrencyPermit> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Some(ConcurrencyPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => {
                tracing::warn!(limiter = %self.name, "concurrency limiter closed");
                None
            }
        }
    }
}

/// Slot held for the duration of one unit of work; released on drop.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fails_fast_at_ceiling() {
        let limiter = ConcurrencyLimiter::new("f", 2);
        let a = limiter.try_acquire().unwrap();
        let _b = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_flight(), 2);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let limiter = ConcurrencyLimiter::new("off", 0);
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_permit_released_when_task_finishes() {
        let limiter = ConcurrencyLimiter::new("task", 1);
        let permit = limiter.try_acquire().unwrap();
        let handle = tokio::spawn(async move {
            let _held = permit;
        });
        handle.await.unwrap();
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.try_acquire().is_some());
    }
}
