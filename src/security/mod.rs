//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request:
//!     → headers.rs ProxyHeaderFilter (strip untrusted proxy headers and cookies,
//!       add X-Forwarded-*)
//!     → routing
//!
//! Every origin exchange:
//!     → headers.rs strip_hop_by_hop (request and response)
//! ```
//!
//! # Design Decisions
//! - No trust in client-supplied proxy headers unless the peer is trusted
//! - Hop-by-hop headers never cross the proxy

pub mod headers;

pub use headers::{strip_hop_by_hop, ProxyHeaderFilter};
