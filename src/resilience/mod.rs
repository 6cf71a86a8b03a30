//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Proxy attempt:
//!     → timeouts.rs (connect/read deadline for the origin)
//!     → concurrency.rs (fail-fast admission for filters and origins)
//!     → On failure: errors.rs (classify into ErrorType)
//!     → retries.rs (retry or give up; backoff.rs for the delay)
//!     → circuit_breaker.rs (sustained failures zero the retry budget)
//! ```
//!
//! # Design Decisions
//! - Every origin call has a deadline
//! - Admission errors are terminal; only transient network classes retry
//! - Failures are `ProxyError` values carrying an `ErrorType`, never panics

pub mod backoff;
pub mod circuit_breaker;
pub mod concurrency;
pub mod errors;
pub mod retries;
pub mod timeouts;

pub use errors::{ErrorStatusMap, ErrorType, ProxyError, StatusCategory};
pub use retries::{GiveUpReason, RetryDecision, RetryInput, RetryPolicy};
pub use timeouts::TimeoutManager;
