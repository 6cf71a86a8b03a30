//! Origin attempt ledger.
//!
//! # Data Flow
//! ```text
//! ProxyEndpoint, per attempt:
//!     Origin::new_request_attempt → RequestAttempt (status -1)
//!     → RequestAttempts::push (numbered 1..N)
//!     → completion fills status / duration / error
//! Debug filter → to_json → x-edge-attempts header
//! ```
//!
//! # Design Decisions
//! - Lives on the RequestSession and travels with it; no thread-local lookup
//! - Append-only; the last record always describes the outcome

pub mod attempt;

pub use attempt::{RequestAttempt, RequestAttempts};
