//! Circuit breaker for origin retry throttling.
//!
//! # States
//! - Closed: normal operation, retries allowed
//! - Open: origin assumed down, retry budget forced to zero
//! - Half-Open: recovery timeout elapsed, next outcome decides
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after recovery timeout
//! Half-Open → Closed: a request succeeds
//! Half-Open → Open: a request fails
//! ```
//!
//! # Design Decisions
//! - Per-origin breaker (not global)
//! - The breaker never rejects first attempts; it only removes retries so a
//!   struggling origin is not hit with amplified traffic

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    recovery: Duration,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery: Duration) -> Self {
        Self {
            threshold,
            recovery,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BreakerState {
        let opened_at = self.opened_at.lock().unwrap_or_else(|e| e.into_inner());
        match *opened_at {
            None => BreakerState::Closed,
            Some(at) if at.elapsed() >= self.recovery => BreakerState::HalfOpen,
            Some(_) => BreakerState::Open,
        }
    }

    /// True while retries against the origin should be suppressed.
    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut opened_at = self.opened_at.lock().unwrap_or_else(|e| e.into_inner());
        if opened_at.take().is_some() {
            tracing::info!("Circuit breaker closed");
        }
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut opened_at = self.opened_at.lock().unwrap_or_else(|e| e.into_inner());
        let half_open = matches!(*opened_at, Some(at) if at.elapsed() >= self.recovery);
        if (opened_at.is_none() && failures >= self.threshold) || half_open {
            *opened_at = Some(Instant::now());
            tracing::warn!(failures, "Circuit breaker opened");
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}
