//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single origin server and its identity (zone/region/app)
//! - Track active connections (for Least Connections LB)
//! - Enforce max connection limits
//! - Track health state (Healthy/Unhealthy)

use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::schema::ServerConfig;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Identity of an origin server, as recorded in attempt records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub zone: Option<String>,
    pub region: Option<String>,
    pub app: Option<String>,
}

impl ServerInfo {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            zone: None,
            region: None,
            app: None,
        }
    }

    pub fn instance_id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A single origin server.
#[derive(Debug)]
pub struct Backend {
    /// The address of the server.
    pub addr: SocketAddr,
    pub info: ServerInfo,
    /// Maximum concurrent connections allowed.
    pub max_connections: usize,
    /// Number of currently active connections.
    pub active_connections: AtomicUsize,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    pub state: AtomicU8,
    /// Consecutive failure count.
    pub consecutive_failures: AtomicUsize,
    /// Consecutive success count.
    pub consecutive_successes: AtomicUsize,
}

impl Backend {
    pub fn new(addr: SocketAddr, max_connections: usize) -> Self {
        Self::with_info(addr, ServerInfo::from_addr(addr), max_connections)
    }

    pub fn with_info(addr: SocketAddr, info: ServerInfo, max_connections: usize) -> Self {
        Self {
            addr,
            info,
            max_connections,
            active_connections: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    /// Build from a `[[origins.servers]]` entry. `None` if the address does not parse.
    pub fn from_config(config: &ServerConfig) -> Option<Self> {
        let addr: SocketAddr = config.address.parse().ok()?;
        let info = ServerInfo {
            zone: config.zone.clone(),
            region: config.region.clone(),
            app: config.app.clone(),
            ..ServerInfo::from_addr(addr)
        };
        Some(Self::with_info(addr, info, config.max_connections))
    }

    /// Get the current number of active connections.
    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Try to reserve a connection slot; `None` at the max connection limit.
    pub fn try_create_guard(self: &Arc<Self>) -> Option<BackendConnectionGuard> {
        let mut prev = self.active_connections.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_connections {
                return None;
            }
            match self.active_connections.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(BackendConnectionGuard {
            backend: self.clone(),
        })
    }

    // --- Health Logic ---

    /// Return true if server is considered healthy (Healthy or Unknown).
    pub fn is_healthy(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Report a successful request/check.
    pub fn mark_success(&self, healthy_threshold: usize) {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Healthy {
            return;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold {
            let prev = self.state.swap(HealthState::Healthy as u8, Ordering::Relaxed);
            if prev == HealthState::Unhealthy as u8 {
                tracing::info!(server = %self.addr, "Server marked healthy");
            }
        }
    }

    /// Report a failed request/check.
    pub fn mark_failure(&self, unhealthy_threshold: usize) {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Unhealthy {
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.state
                .store(HealthState::Unhealthy as u8, Ordering::Relaxed);
            tracing::warn!(server = %self.addr, failures, "Server marked unhealthy");
        }
    }
}

/// A RAII guard that holds one connection slot on a server.
#[derive(Debug)]
pub struct BackendConnectionGuard {
    pub backend: Arc<Backend>,
}

impl Deref for BackendConnectionGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendConnectionGuard {
    fn drop(&mut self) {
        self.backend.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_enforces_max_connections() {
        let backend = Arc::new(Backend::new("127.0.0.1:9000".parse().unwrap(), 1));
        let guard = backend.try_create_guard().unwrap();
        assert_eq!(backend.active(), 1);
        assert!(backend.try_create_guard().is_none());

        drop(guard);
        assert_eq!(backend.active(), 0);
        assert!(backend.try_create_guard().is_some());
    }

    #[test]
    fn test_health_transitions() {
        let backend = Backend::new("127.0.0.1:9000".parse().unwrap(), 10);
        assert_eq!(backend.health(), HealthState::Unknown);
        assert!(backend.is_healthy());

        backend.mark_failure(2);
        assert!(backend.is_healthy());
        backend.mark_failure(2);
        assert_eq!(backend.health(), HealthState::Unhealthy);

        backend.mark_success(2);
        assert!(!backend.is_healthy());
        backend.mark_success(2);
        assert_eq!(backend.health(), HealthState::Healthy);
    }

    #[test]
    fn test_from_config_keeps_identity() {
        let config = ServerConfig {
            address: "10.1.2.3:8080".to_string(),
            zone: Some("z1".to_string()),
            region: None,
            app: Some("api".to_string()),
            max_connections: 5,
        };
        let backend = Backend::from_config(&config).unwrap();
        assert_eq!(backend.info.host, "10.1.2.3");
        assert_eq!(backend.info.port, 8080);
        assert_eq!(backend.info.zone.as_deref(), Some("z1"));
        assert_eq!(backend.max_connections, 5);

        let bad = ServerConfig {
            address: "not-an-addr".to_string(),
            ..config
        };
        assert!(Backend::from_config(&bad).is_none());
    }
}
