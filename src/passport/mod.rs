//! Passport: per-request diagnostic timeline.
//!
//! # Data Flow
//! ```text
//! Transport accepts request → NEW, IN_REQ_* states
//!     → FilterChain records FILTERS_<TYPE>_START/END
//!     → ProxyEndpoint records ORIGIN_CONN_ACQUIRE_*, ORIGIN_RETRY_START, IN_RESP_*
//!     → Debug filter / access log render the text form
//! ```
//!
//! # Design Decisions
//! - Offsets come from a monotonic clock; only creation time is wall-clock
//! - Missing states yield zero durations rather than errors
//! - Per-chunk content states can be suppressed by configuration

pub mod state;
pub mod timeline;

pub use state::PassportState;
pub use timeline::{Passport, PassportParseError, StartAndEnd, StateTime};
