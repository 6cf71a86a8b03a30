//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least connections selector.
/// Selects the healthy server with the minimum number of active connections.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // Ties go to the first server (stability)
        backends
            .iter()
            .filter(|b| b.is_healthy())
            .min_by_key(|b| b.active())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let b1 = Arc::new(Backend::new("127.0.0.1:8080".parse().unwrap(), 100));
        let b2 = Arc::new(Backend::new("127.0.0.1:8081".parse().unwrap(), 100));

        let _g1 = b1.try_create_guard().unwrap();
        let backends = vec![b1.clone(), b2.clone()];

        // b2 has 0 connections
        let s1 = lb.next_server(&backends).unwrap();
        assert_eq!(s1.addr, b2.addr);

        let _g2 = b2.try_create_guard().unwrap();
        let _g3 = b2.try_create_guard().unwrap();

        // b1 has 1, b2 has 2
        let s2 = lb.next_server(&backends).unwrap();
        assert_eq!(s2.addr, b1.addr);
    }

    #[test]
    fn test_skips_unhealthy() {
        let lb = LeastConnections::new();
        let b1 = Arc::new(Backend::new("127.0.0.1:8080".parse().unwrap(), 100));
        let b2 = Arc::new(Backend::new("127.0.0.1:8081".parse().unwrap(), 100));
        let _g = b2.try_create_guard().unwrap();
        b1.mark_failure(1);

        let picked = lb.next_server(&[b1, b2.clone()]).unwrap();
        assert_eq!(picked.addr, b2.addr);
    }
}
