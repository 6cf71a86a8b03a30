//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! HttpOrigin::connect(attempt)
//!     → pool.rs (candidate servers: healthy, not yet tried by this request)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through servers)
//!         - least_conn.rs (pick server with fewest connections)
//!     → backend.rs (reserve a connection slot, enforce max connections)
//!     → Return connection guard or SelectError
//! ```
//!
//! # Design Decisions
//! - Algorithm is stateless apart from its own cursor; servers track connections
//! - Algorithm selection per origin
//! - Unhealthy servers excluded from selection
//! - A retry prefers a server the request has not tried yet

use std::fmt::Debug;
use std::sync::Arc;

pub mod backend;
pub mod least_conn;
pub mod pool;
pub mod round_robin;

use backend::Backend;

/// Chooses the next server from a candidate list.
pub trait LoadBalancer: Send + Sync + Debug {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}
