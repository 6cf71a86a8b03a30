//! Request-processing pipeline.
//!
//! # Data Flow
//! ```text
//! HttpRequestMessage (fresh RequestSession)
//!     → inbound chain   (ascending order; priority floor; concurrency limit)
//!     → endpoint        (error endpoint | static response | named endpoint, default "proxy")
//!     → outbound chain  (on the HttpResponseMessage)
//!     → HttpResponseMessage to the transport
//! ```
//!
//! # Design Decisions
//! - One `Filter<M>` trait tagged by `FilterType`; sync filters are adapted with `Synchronous`
//! - Failures are isolated per filter: `OnError::Continue` records and moves on,
//!   `OnError::Abort` sets the session error and stops the chain
//! - Over-limit filters fail fast instead of queueing
//! - Every filter outcome is recorded on the session and pushed to the `MetricsSink`

pub mod chain;
pub mod debug;
pub mod filter;
pub mod processor;

pub use chain::{AbortCause, ChainOutcome, ChainState, FilterChain};
pub use debug::{DebugRequestFilter, DebugResponseFilter};
pub use filter::{
    Endpoint, ExecutionStatus, Filter, FilterError, FilterExecution, FilterInfo, FilterMessage,
    FilterType, FnFilter, OnError, SyncFilter, Synchronous,
};
pub use processor::{FilterProcessor, FilterProcessorBuilder, DEFAULT_ENDPOINT};
