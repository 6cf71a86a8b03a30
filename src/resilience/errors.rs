//! Proxy failure taxonomy.
//!
//! # Responsibilities
//! - Classify every origin/transport/admission failure into a fixed `ErrorType`
//! - Map each classification to a client-facing HTTP status and a metrics category
//! - Carry the classification plus an optional cause through the retry loop
//!
//! # Design Decisions
//! - Failures are values, not unwinding: the retry loop matches on `ErrorType`
//! - Statuses are defaults; `ErrorStatusMap` applies `[errors.status_overrides]`
//! - `ProxyError` is `Clone` so the session can keep a copy of the terminal error

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Classification of a failed proxy attempt or a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Origin did not answer within the read timeout.
    ReadTimeout,
    /// TCP connect to the chosen server failed.
    ConnectError,
    /// Origin answered with a retryable "unavailable" status (503 by default).
    ServiceUnavailable,
    /// Origin answered 5xx outside the retryable set.
    ErrorStatusResponse,
    /// Origin has no healthy servers.
    NoAvailableServers,
    /// Chosen server is at its configured connection ceiling.
    OriginServerMaxConns,
    /// Connection was reset or closed mid-exchange.
    ResetConnection,
    /// Too many in-flight requests to this origin.
    OriginConcurrencyExceeded,
    /// A filter exceeded its concurrency ceiling.
    FilterConcurrencyExceeded,
    /// No route matched, or the route names an unknown origin.
    OriginNotFound,
    /// The client went away or cancelled the request.
    ClientCancelled,
    /// Anything else.
    Other,
}

impl ErrorType {
    /// All classifications, in declaration order.
    pub const ALL: [ErrorType; 12] = [
        ErrorType::ReadTimeout,
        ErrorType::ConnectError,
        ErrorType::ServiceUnavailable,
        ErrorType::ErrorStatusResponse,
        ErrorType::NoAvailableServers,
        ErrorType::OriginServerMaxConns,
        ErrorType::ResetConnection,
        ErrorType::OriginConcurrencyExceeded,
        ErrorType::FilterConcurrencyExceeded,
        ErrorType::OriginNotFound,
        ErrorType::ClientCancelled,
        ErrorType::Other,
    ];

    /// Status returned to the client when this is the terminal outcome.
    pub fn default_status(&self) -> u16 {
        match self {
            ErrorType::ReadTimeout => 504,
            ErrorType::ConnectError => 502,
            ErrorType::ServiceUnavailable => 503,
            ErrorType::ErrorStatusResponse => 500,
            ErrorType::NoAvailableServers => 502,
            ErrorType::OriginServerMaxConns => 503,
            ErrorType::ResetConnection => 504,
            ErrorType::OriginConcurrencyExceeded => 503,
            ErrorType::FilterConcurrencyExceeded => 503,
            ErrorType::OriginNotFound => 404,
            ErrorType::ClientCancelled => 400,
            ErrorType::Other => 500,
        }
    }

    /// Whether this failure is transient enough to try another server.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorType::ReadTimeout
                | ErrorType::ConnectError
                | ErrorType::ServiceUnavailable
                | ErrorType::ResetConnection
        )
    }

    /// Metrics bucket for this failure.
    pub fn status_category(&self) -> StatusCategory {
        match self {
            ErrorType::ReadTimeout => StatusCategory::FailureOriginReadTimeout,
            ErrorType::ConnectError | ErrorType::ResetConnection => {
                StatusCategory::FailureOriginConnectivity
            }
            ErrorType::ServiceUnavailable => StatusCategory::FailureOriginThrottled,
            ErrorType::ErrorStatusResponse => StatusCategory::FailureOrigin,
            ErrorType::NoAvailableServers => StatusCategory::FailureOriginNoServers,
            ErrorType::OriginServerMaxConns => {
                StatusCategory::FailureLocalThrottledOriginServerMaxConn
            }
            ErrorType::OriginConcurrencyExceeded => {
                StatusCategory::FailureLocalThrottledOriginConcurrency
            }
            ErrorType::FilterConcurrencyExceeded => {
                StatusCategory::FailureLocalThrottledFilterConcurrency
            }
            ErrorType::OriginNotFound => StatusCategory::FailureLocalNoRoute,
            ErrorType::ClientCancelled => StatusCategory::FailureClientCancelled,
            ErrorType::Other => StatusCategory::FailureLocal,
        }
    }

    /// Wire name, as used in config keys and the `x-edge-error` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ReadTimeout => "READ_TIMEOUT",
            ErrorType::ConnectError => "CONNECT_ERROR",
            ErrorType::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorType::ErrorStatusResponse => "ERROR_STATUS_RESPONSE",
            ErrorType::NoAvailableServers => "NO_AVAILABLE_SERVERS",
            ErrorType::OriginServerMaxConns => "ORIGIN_SERVER_MAX_CONNS",
            ErrorType::ResetConnection => "RESET_CONNECTION",
            ErrorType::OriginConcurrencyExceeded => "ORIGIN_CONCURRENCY_EXCEEDED",
            ErrorType::FilterConcurrencyExceeded => "FILTER_CONCURRENCY_EXCEEDED",
            ErrorType::OriginNotFound => "ORIGIN_NOT_FOUND",
            ErrorType::ClientCancelled => "CLIENT_CANCELLED",
            ErrorType::Other => "OTHER",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse outcome buckets reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCategory {
    Success,
    FailureLocal,
    FailureLocalNoRoute,
    FailureLocalThrottledFilterConcurrency,
    FailureLocalThrottledOriginConcurrency,
    FailureLocalThrottledOriginServerMaxConn,
    FailureOrigin,
    FailureOriginReadTimeout,
    FailureOriginConnectivity,
    FailureOriginThrottled,
    FailureOriginNoServers,
    FailureClientCancelled,
}

impl StatusCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::Success => "SUCCESS",
            StatusCategory::FailureLocal => "FAILURE_LOCAL",
            StatusCategory::FailureLocalNoRoute => "FAILURE_LOCAL_NO_ROUTE",
            StatusCategory::FailureLocalThrottledFilterConcurrency => {
                "FAILURE_LOCAL_THROTTLED_FILTER_CONCURRENCY"
            }
            StatusCategory::FailureLocalThrottledOriginConcurrency => {
                "FAILURE_LOCAL_THROTTLED_ORIGIN_CONCURRENCY"
            }
            StatusCategory::FailureLocalThrottledOriginServerMaxConn => {
                "FAILURE_LOCAL_THROTTLED_ORIGIN_SERVER_MAXCONN"
            }
            StatusCategory::FailureOrigin => "FAILURE_ORIGIN",
            StatusCategory::FailureOriginReadTimeout => "FAILURE_ORIGIN_READ_TIMEOUT",
            StatusCategory::FailureOriginConnectivity => "FAILURE_ORIGIN_CONNECTIVITY",
            StatusCategory::FailureOriginThrottled => "FAILURE_ORIGIN_THROTTLED",
            StatusCategory::FailureOriginNoServers => "FAILURE_ORIGIN_NO_SERVERS",
            StatusCategory::FailureClientCancelled => "FAILURE_CLIENT_CANCELLED",
        }
    }
}

/// A classified proxy failure with an optional underlying cause.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error_type}: {message}{}", cause_suffix(.cause))]
pub struct ProxyError {
    error_type: ErrorType,
    message: String,
    #[source]
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    cause_type: Option<&'static str>,
}

fn cause_suffix(cause: &Option<Arc<dyn std::error::Error + Send + Sync>>) -> String {
    match cause {
        Some(cause) => format!(" ({cause})"),
        None => String::new(),
    }
}

impl ProxyError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            cause: None,
            cause_type: None,
        }
    }

    /// Attach the underlying error.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause_type = Some(std::any::type_name::<E>());
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn read_timeout(timeout: std::time::Duration) -> Self {
        Self::new(
            ErrorType::ReadTimeout,
            format!("origin did not respond within {}ms", timeout.as_millis()),
        )
    }

    pub fn client_cancelled() -> Self {
        Self::new(ErrorType::ClientCancelled, "request cancelled by client")
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Type of the underlying cause for attempt records, or the
    /// classification when there is none.
    pub fn exception_type(&self) -> String {
        match self.cause_type {
            Some(name) => name.to_string(),
            None => format!("{:?}", self.error_type),
        }
    }
}

/// Resolves the client-facing status for each `ErrorType`.
#[derive(Debug, Clone, Default)]
pub struct ErrorStatusMap {
    overrides: HashMap<ErrorType, u16>,
}

impl ErrorStatusMap {
    pub fn new(overrides: HashMap<ErrorType, u16>) -> Self {
        Self { overrides }
    }

    pub fn status_for(&self, error_type: ErrorType) -> u16 {
        self.overrides
            .get(&error_type)
            .copied()
            .unwrap_or_else(|| error_type.default_status())
    }
}
