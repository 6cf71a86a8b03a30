//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! SIGTERM/SIGINT → Shutdown::trigger
//!     → HttpServer stops accepting, in-flight requests drain
//!     → HealthMonitor exits its loop
//!     → main returns
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Draining has a deadline

pub mod shutdown;

pub use shutdown::Shutdown;
