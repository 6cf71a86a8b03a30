//! Request context.
//!
//! # Data Flow
//! ```text
//! Transport accepts request → RequestSession::with_id(x-request-id)
//!     → moved into HttpRequestMessage
//!     → filters read/write values and flags
//!     → ProxyEndpoint appends attempts, passport states
//!     → moved into HttpResponseMessage → outbound filters → dropped
//! ```
//!
//! # Design Decisions
//! - Exactly one owner at a time: the session moves with the message, so no locking
//! - Typed keys instead of string-keyed `Any` lookups at call sites
//! - Cancellation is the only shared piece (Arc), so clones observe it

pub mod session;

pub use session::{CancelHandle, RequestSession, SessionKey, SessionValue, StaticResponse};
