//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each origin server
//!     → Backend::mark_success / mark_failure
//!
//! Passive health checks (origin/http.rs):
//!     OriginConnection::release(outcome)
//!     → Backend::mark_success / mark_failure
//!
//! State machine (load_balancer/backend.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Health state is per-server, not per-origin

pub mod active;

pub use active::HealthMonitor;
