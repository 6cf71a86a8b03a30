//! Per-origin server pool.
//!
//! # Responsibilities
//! - Hold the servers of one origin and its load balancing algorithm
//! - Select a server and reserve a connection slot on it
//! - Report why selection failed (no servers vs. max connections)

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::schema::{LoadBalancerStrategy, OriginConfig};
use crate::load_balancer::{
    backend::{Backend, BackendConnectionGuard, ServerInfo},
    least_conn::LeastConnections,
    round_robin::RoundRobin,
    LoadBalancer,
};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SelectError {
    #[error("no available servers for origin {0}")]
    NoServers(String),

    #[error("server {} reached max connections", .0.instance_id())]
    MaxConnections(ServerInfo),
}

/// Servers of one origin plus the algorithm choosing among them.
#[derive(Debug)]
pub struct BackendPool {
    origin: String,
    backends: Vec<Arc<Backend>>,
    lb: Box<dyn LoadBalancer>,
}

impl BackendPool {
    pub fn new(origin: impl Into<String>, backends: Vec<Arc<Backend>>, strategy: LoadBalancerStrategy) -> Self {
        let lb: Box<dyn LoadBalancer> = match strategy {
            LoadBalancerStrategy::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalancerStrategy::LeastConnections => Box::new(LeastConnections::new()),
        };
        Self {
            origin: origin.into(),
            backends,
            lb,
        }
    }

    pub fn from_config(config: &OriginConfig) -> Self {
        let backends = config
            .servers
            .iter()
            .filter_map(|server| {
                let backend = Backend::from_config(server);
                if backend.is_none() {
                    tracing::warn!(origin = %config.name, address = %server.address, "Invalid server address");
                }
                backend.map(Arc::new)
            })
            .collect();
        Self::new(config.name.clone(), backends, config.load_balancer)
    }

    /// Select a server, preferring ones not in `tried`, and reserve a slot on it.
    pub fn select(&self, tried: &[SocketAddr]) -> Result<BackendConnectionGuard, SelectError> {
        let healthy: Vec<Arc<Backend>> = self
            .backends
            .iter()
            .filter(|b| b.is_healthy())
            .cloned()
            .collect();

        let fresh: Vec<Arc<Backend>> = healthy
            .iter()
            .filter(|b| !tried.contains(&b.addr))
            .cloned()
            .collect();
        let candidates = if fresh.is_empty() { &healthy } else { &fresh };

        let Some(backend) = self.lb.next_server(candidates) else {
            tracing::debug!(
                origin = %self.origin,
                backend_count = self.backends.len(),
                "No healthy servers found for origin"
            );
            return Err(SelectError::NoServers(self.origin.clone()));
        };

        backend
            .try_create_guard()
            .ok_or_else(|| SelectError::MaxConnections(backend.info.clone()))
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// All servers (for health checking).
    pub fn all_backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }
}
