//! HTTP transport adapter.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum, request ID, tracing)
//!     → convert.rs (axum Request → HttpRequestMessage, streamed body)
//!     → FilterProcessor::process
//!     → convert.rs (HttpResponseMessage → axum Response, streamed body)
//!     → Send to client
//! ```

pub mod convert;
pub mod server;

pub use server::{build_processor, HttpServer, X_REQUEST_ID};
