//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::filters::FilterType;
use crate::resilience::errors::ErrorType;

/// Root configuration for the edge proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Origin services requests are proxied to.
    pub origins: Vec<OriginConfig>,

    /// Route definitions mapping requests to origins.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Filter pipeline settings.
    pub filters: FilterConfig,

    /// Client-facing status overrides per error type.
    pub errors: ErrorConfig,

    /// Passport (request timeline) settings.
    pub passport: PassportConfig,

    /// Untrusted proxy header / cookie policy.
    pub headers: HeaderPolicyConfig,

    /// Request body buffering.
    pub body: BodyConfig,

    /// Priority-floor load shedding.
    pub load_shedding: LoadSheddingConfig,

    /// Per-request debug mode.
    pub debug: DebugConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Server selection strategy within an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
}

/// An origin (backend service) and its servers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OriginConfig {
    /// Origin name referenced by routes.
    pub name: String,

    /// Servers backing this origin.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    #[serde(default)]
    pub load_balancer: LoadBalancerStrategy,

    /// Retries allowed per request; falls back to `retries.default_max_retries`.
    #[serde(default)]
    pub max_retries: Option<i32>,

    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    /// Maximum in-flight requests to this origin across all servers.
    #[serde(default = "default_origin_concurrency")]
    pub concurrency_limit: usize,
}

fn default_origin_concurrency() -> usize {
    10_000
}

/// A single origin server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server address (e.g., "127.0.0.1:3000").
    pub address: String,

    #[serde(default)]
    pub zone: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub app: Option<String>,

    /// Maximum concurrent connections to this server.
    #[serde(default = "default_max_server_conns")]
    pub max_connections: usize,
}

fn default_max_server_conns() -> usize {
    100
}

/// Route configuration mapping requests to origins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host header to match (exact match, case-insensitive).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Origin name to forward to.
    pub origin: String,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,
}

/// Timeout configuration for origin communication.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Time allowed for the origin to answer with response headers.
    pub read_ms: u64,

    /// Upper bound for per-request read timeout overrides.
    pub max_read_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 500,
            read_ms: 30_000,
            max_read_ms: 60_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed per request when the origin does not say otherwise.
    pub default_max_retries: i32,

    /// Origin statuses that are retried on another server.
    pub retryable_statuses: Vec<u16>,

    /// Base delay for exponential backoff in milliseconds (0 = immediate).
    pub backoff_base_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub backoff_max_ms: u64,

    /// Consecutive origin failures that open the retry circuit breaker.
    pub breaker_failure_threshold: u32,

    /// Seconds before an open breaker allows retries again.
    pub breaker_recovery_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 1,
            retryable_statuses: vec![503],
            backoff_base_ms: 0,
            backoff_max_ms: 1000,
            breaker_failure_threshold: 20,
            breaker_recovery_secs: 10,
        }
    }
}

/// Filter pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Concurrency ceiling applied to every filter without an override.
    pub default_concurrency_limit: usize,

    /// Ceilings keyed by filter name.
    pub concurrency_limits: HashMap<String, usize>,

    /// Ceilings keyed by filter type.
    pub type_concurrency_limits: HashMap<FilterType, usize>,

    /// Filter names that are never run.
    pub disabled: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            default_concurrency_limit: 4000,
            concurrency_limits: HashMap::new(),
            type_concurrency_limits: HashMap::new(),
            disabled: Vec::new(),
        }
    }
}

impl FilterConfig {
    /// Resolve the ceiling for a filter: name override, then type override, then default.
    pub fn concurrency_limit_for(&self, name: &str, filter_type: FilterType) -> usize {
        self.concurrency_limits
            .get(name)
            .or_else(|| self.type_concurrency_limits.get(&filter_type))
            .copied()
            .unwrap_or(self.default_concurrency_limit)
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d == name)
    }
}

/// Client-facing status overrides.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ErrorConfig {
    pub status_overrides: HashMap<ErrorType, u16>,
}

/// Passport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PassportConfig {
    /// Record per-chunk content states (high volume).
    pub content_chunk_states: bool,
}

impl Default for PassportConfig {
    fn default() -> Self {
        Self {
            content_chunk_states: true,
        }
    }
}

/// When inbound `X-Forwarded-*` style headers are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllowProxyHeaders {
    Always,
    #[default]
    TrustedPeers,
    Never,
}

/// Header hygiene for requests arriving from clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderPolicyConfig {
    pub allow_proxy_headers: AllowProxyHeaders,

    /// Peer IPs whose proxy headers are kept under `trusted_peers`.
    pub trusted_peers: Vec<String>,

    /// Headers considered proxy-controlled.
    pub untrusted_headers: Vec<String>,

    /// Cookie names removed from inbound `Cookie` headers.
    pub strip_cookies: Vec<String>,

    /// Append X-Forwarded-For/Proto/Host after stripping.
    pub add_forwarded_headers: bool,
}

impl Default for HeaderPolicyConfig {
    fn default() -> Self {
        Self {
            allow_proxy_headers: AllowProxyHeaders::TrustedPeers,
            trusted_peers: Vec::new(),
            untrusted_headers: vec![
                "x-forwarded-for".to_string(),
                "x-forwarded-host".to_string(),
                "x-forwarded-port".to_string(),
                "x-forwarded-proto".to_string(),
                "x-forwarded-proto-version".to_string(),
                "x-real-ip".to_string(),
            ],
            strip_cookies: Vec::new(),
            add_forwarded_headers: true,
        }
    }
}

/// Request body buffering.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Bodies larger than this are streamed without a replay copy.
    pub max_buffered_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            max_buffered_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Load shedding by raising the filter priority floor.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadSheddingConfig {
    pub enabled: bool,

    /// Active requests above which new requests get the raised floor.
    pub active_request_threshold: u64,

    /// Floor applied while shedding; filters with lower priority are disabled.
    pub priority_floor: i32,
}

impl Default for LoadSheddingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            active_request_threshold: 5_000,
            priority_floor: 10,
        }
    }
}

/// Per-request debug mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,

    /// Request header that turns on debug mode when set to "true".
    pub header: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header: "x-edge-debug".to_string(),
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [[origins]]
            name = "api"
            [[origins.servers]]
            address = "127.0.0.1:3000"

            [[routes]]
            name = "all"
            path_prefix = "/"
            origin = "api"
            "#,
        )
        .unwrap();

        assert_eq!(config.filters.default_concurrency_limit, 4000);
        assert_eq!(config.retries.retryable_statuses, vec![503]);
        assert_eq!(config.origins[0].servers[0].max_connections, 100);
        assert_eq!(config.origins[0].load_balancer, LoadBalancerStrategy::RoundRobin);
        assert!(config.passport.content_chunk_states);
    }

    #[test]
    fn test_filter_limit_precedence() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [filters]
            default_concurrency_limit = 50
            [filters.concurrency_limits]
            routing = 5
            [filters.type_concurrency_limits]
            outbound = 7
            [errors.status_overrides]
            READ_TIMEOUT = 503
            "#,
        )
        .unwrap();

        let filters = &config.filters;
        assert_eq!(filters.concurrency_limit_for("routing", FilterType::Inbound), 5);
        assert_eq!(filters.concurrency_limit_for("debug", FilterType::Outbound), 7);
        assert_eq!(filters.concurrency_limit_for("other", FilterType::Inbound), 50);
        assert_eq!(
            config.errors.status_overrides.get(&ErrorType::ReadTimeout),
            Some(&503)
        );
    }
}
