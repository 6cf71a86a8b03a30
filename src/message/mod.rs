//! HTTP message model.
//!
//! # Data Flow
//! ```text
//! axum Request → HttpRequestMessage { session, method, path, query, headers, body }
//!     → inbound filters mutate it
//!     → ProxyEndpoint streams the body (tee + replay buffer)
//!     → HttpResponseMessage { session, request snapshot, status, headers, body }
//! ```
//!
//! # Design Decisions
//! - Headers are our own multimap so names keep their original case
//! - Messages own the session; it moves from request to response
//! - Cloning copies only what is buffered; a live stream has one reader

pub mod body;
pub mod headers;
pub mod query;
pub mod request;
pub mod response;

pub use body::{Body, BodyError, BodyStream};
pub use headers::Headers;
pub use query::QueryParams;
pub use request::{HttpRequestMessage, RequestInfo};
pub use response::HttpResponseMessage;
