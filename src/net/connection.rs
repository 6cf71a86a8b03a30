//! In-flight request tracking.
//!
//! # Responsibilities
//! - Count requests currently inside the pipeline
//! - Derive the filter priority floor for new requests (load shedding)
//! - Let shutdown wait for in-flight requests to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::LoadSheddingConfig;

/// Global atomic counter for request sequence numbers.
/// Relaxed ordering is enough since we only need uniqueness.
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Process-unique sequence number of an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestSeq(u64);

impl RequestSeq {
    pub fn next() -> Self {
        Self(REQUEST_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Counts in-flight requests.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new in-flight request. Returns a guard that decrements on drop.
    pub fn track(&self) -> RequestGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            active_count: Arc::clone(&self.active_count),
            seq: RequestSeq::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Priority floor for a request admitted now, `None` when not shedding.
    pub fn shedding_floor(&self, config: &LoadSheddingConfig) -> Option<i32> {
        (config.enabled && self.active_count() > config.active_request_threshold)
            .then_some(config.priority_floor)
    }

    /// Wait until no requests are in flight, up to `timeout`. Returns whether
    /// everything drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Decrements the in-flight count when dropped.
#[derive(Debug)]
pub struct RequestGuard {
    active_count: Arc<AtomicU64>,
    seq: RequestSeq,
}

impl RequestGuard {
    pub fn seq(&self) -> RequestSeq {
        self.seq
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(seq = %self.seq, "Request finished");
    }
}
