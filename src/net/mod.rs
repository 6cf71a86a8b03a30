//! Request admission bookkeeping.
//!
//! # Data Flow
//! ```text
//! Accepted request
//!     → ConnectionTracker::track (in-flight += 1)
//!     → shedding_floor → RequestSession::filter_priority_floor
//!     → pipeline
//!     → guard dropped (in-flight -= 1)
//! ```
//!
//! # Design Decisions
//! - Load shedding disables low-priority filters instead of rejecting requests
//! - Shutdown drains in-flight requests with a deadline

pub mod connection;

pub use connection::{ConnectionTracker, RequestGuard};
