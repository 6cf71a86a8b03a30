//! Origin proxying.
//!
//! # Data Flow
//! ```text
//! FilterProcessor::run_endpoint
//!     → ProxyEndpoint::proxy
//!         → retry budget = Origin::max_retries_for_request
//!         → loop per attempt:
//!             cancelled?                → CLIENT_CANCELLED
//!             retry?                    → ORIGIN_RETRY_START, rewind body, backoff
//!             Origin::connect           → ORIGIN_CONN_ACQUIRE_START / END | FAILED
//!             ledger.push(attempt)
//!             send (read timeout, cancel) → response | ProxyError
//!             classify → success        → release(Success), done
//!                      → failure        → release, adjust budget, RetryPolicy::decide
//!         → Origin::record_proxy_request_end   (once)
//!     → origin response | ErrorEndpoint::render
//! ```
//!
//! # Design Decisions
//! - A failed connection is never reused; every attempt acquires a new one
//! - The body is taken only after connect succeeds, so a connect failure never
//!   consumes the client stream
//! - When retries run out after a failure status, the origin's response is forwarded

pub mod endpoint;
pub mod error_endpoint;

pub use endpoint::ProxyEndpoint;
pub use error_endpoint::{ErrorEndpoint, ERROR_HEADER};
