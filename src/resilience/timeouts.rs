//! Timeout lookup for origin communication.
//!
//! # Responsibilities
//! - Resolve connect/read timeouts per origin (origin value, else global)
//! - Apply a per-request read timeout override, capped at `max_read_ms`
//!
//! # Design Decisions
//! - Enforcement happens in the proxy loop via `tokio::time::timeout`;
//!   this type only answers "how long"
//! - Timed-out reads classify as `READ_TIMEOUT` (504 by default)

use std::collections::HashMap;
use std::time::Duration;

use crate::config::schema::{OriginConfig, TimeoutConfig};
use crate::context::RequestSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OriginTimeouts {
    connect: Duration,
    read: Duration,
}

/// Per-origin connect/read timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    default_connect: Duration,
    default_read: Duration,
    max_read: Duration,
    origins: HashMap<String, OriginTimeouts>,
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default(), &[])
    }
}

impl TimeoutManager {
    pub fn from_config(timeouts: &TimeoutConfig, origins: &[OriginConfig]) -> Self {
        let default_connect = Duration::from_millis(timeouts.connect_ms);
        let default_read = Duration::from_millis(timeouts.read_ms);

        let origins = origins
            .iter()
            .map(|o| {
                let t = OriginTimeouts {
                    connect: o
                        .connect_timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(default_connect),
                    read: o
                        .read_timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(default_read),
                };
                (o.name.clone(), t)
            })
            .collect();

        Self {
            default_connect,
            default_read,
            max_read: Duration::from_millis(timeouts.max_read_ms),
            origins,
        }
    }

    /// Override one origin's timeouts (used by embedders and tests).
    pub fn set_origin(&mut self, origin: &str, connect: Duration, read: Duration) {
        self.origins
            .insert(origin.to_string(), OriginTimeouts { connect, read });
    }

    pub fn connect_timeout(&self, origin: &str) -> Duration {
        self.origins
            .get(origin)
            .map(|t| t.connect)
            .unwrap_or(self.default_connect)
    }

    /// Read timeout for the origin, unless the session carries an override.
    pub fn read_timeout(&self, origin: &str, session: &RequestSession) -> Duration {
        if let Some(requested) = session.read_timeout_override() {
            return requested.min(self.max_read);
        }
        self.origins
            .get(origin)
            .map(|t| t.read)
            .unwrap_or(self.default_read)
    }
}
