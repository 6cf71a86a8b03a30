//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the `MetricsSink` collaborator the pipeline pushes events to
//! - Publish those events through the `metrics` facade
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `edge_filter_executions_total` (counter): by filter, type, status
//! - `edge_filter_duration_seconds` (histogram): by filter, type
//! - `edge_proxy_requests_total` (counter): by origin, status, category
//! - `edge_proxy_request_duration_seconds` (histogram): by origin
//! - `edge_proxy_attempts` (histogram): attempts per logical request
//! - `edge_proxy_retries_total` (counter): by origin, error type
//!
//! # Design Decisions
//! - Push-only and fire-and-forget; sinks never fail the request
//! - Injected into the processor and proxy endpoint, no global registry lookups

use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::filters::{ExecutionStatus, FilterType};
use crate::resilience::errors::{ErrorType, StatusCategory};

/// Final outcome of one proxied request.
#[derive(Debug, Clone)]
pub struct ProxyCompletion<'a> {
    pub origin: &'a str,
    pub status: u16,
    pub category: StatusCategory,
    pub error_type: Option<ErrorType>,
    pub attempts: u32,
    pub duration: Duration,
}

/// Receiver of pipeline outcome events.
pub trait MetricsSink: Send + Sync + Debug {
    fn filter_executed(
        &self,
        name: &str,
        filter_type: FilterType,
        status: ExecutionStatus,
        duration: Duration,
    );

    fn proxy_retry(&self, origin: &str, error_type: ErrorType);

    fn proxy_completed(&self, completion: &ProxyCompletion<'_>);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn filter_executed(&self, _: &str, _: FilterType, _: ExecutionStatus, _: Duration) {}

    fn proxy_retry(&self, _: &str, _: ErrorType) {}

    fn proxy_completed(&self, _: &ProxyCompletion<'_>) {}
}

/// Publishes through the `metrics` facade (Prometheus when installed).
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn filter_executed(
        &self,
        name: &str,
        filter_type: FilterType,
        status: ExecutionStatus,
        duration: Duration,
    ) {
        metrics::counter!(
            "edge_filter_executions_total",
            "filter" => name.to_string(),
            "type" => filter_type.as_str(),
            "status" => status.as_str()
        )
        .increment(1);

        if status == ExecutionStatus::Success || status == ExecutionStatus::Failed {
            metrics::histogram!(
                "edge_filter_duration_seconds",
                "filter" => name.to_string(),
                "type" => filter_type.as_str()
            )
            .record(duration.as_secs_f64());
        }
    }

    fn proxy_retry(&self, origin: &str, error_type: ErrorType) {
        metrics::counter!(
            "edge_proxy_retries_total",
            "origin" => origin.to_string(),
            "error_type" => error_type.as_str()
        )
        .increment(1);
    }

    fn proxy_completed(&self, completion: &ProxyCompletion<'_>) {
        metrics::counter!(
            "edge_proxy_requests_total",
            "origin" => completion.origin.to_string(),
            "status" => completion.status.to_string(),
            "category" => completion.category.as_str()
        )
        .increment(1);

        metrics::histogram!(
            "edge_proxy_request_duration_seconds",
            "origin" => completion.origin.to_string()
        )
        .record(completion.duration.as_secs_f64());

        metrics::histogram!(
            "edge_proxy_attempts",
            "origin" => completion.origin.to_string()
        )
        .record(f64::from(completion.attempts));
    }
}

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks_accept_events_without_recorder() {
        let completion = ProxyCompletion {
            origin: "api",
            status: 200,
            category: StatusCategory::Success,
            error_type: None,
            attempts: 1,
            duration: Duration::from_millis(3),
        };
        for sink in [&PrometheusSink as &dyn MetricsSink, &NoopSink] {
            sink.filter_executed(
                "routing",
                FilterType::Inbound,
                ExecutionStatus::Success,
                Duration::from_micros(40),
            );
            sink.proxy_retry("api", ErrorType::ConnectError);
            sink.proxy_completed(&completion);
        }
    }
}
