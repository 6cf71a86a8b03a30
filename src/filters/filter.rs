//! Filter contracts.
//!
//! # Responsibilities
//! - `Filter<M>`: asynchronous filter over a request or response message
//! - `SyncFilter<M>` + `Synchronous`: filters without I/O
//! - `Endpoint`: turns a request into a response (proxy, static, error)
//! - Execution records surfaced to metrics and debug headers

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::context::RequestSession;
use crate::message::{HttpRequestMessage, HttpResponseMessage};
use crate::resilience::errors::ProxyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Inbound,
    Outbound,
    Endpoint,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::Inbound => "inbound",
            FilterType::Outbound => "outbound",
            FilterType::Endpoint => "endpoint",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
    Disabled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Skipped => "SKIPPED",
            ExecutionStatus::Disabled => "DISABLED",
        }
    }
}

/// What a chain does when this filter fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnError {
    /// Record the failure and run the next filter.
    #[default]
    Continue,
    /// Record the failure and end the chain with an error.
    Abort,
}

/// Static description of a filter.
#[derive(Debug, Clone)]
pub struct FilterInfo {
    pub name: String,
    pub filter_type: FilterType,
    /// Ascending; ties run in registration order.
    pub order: i32,
    /// Compared against the session's priority floor under load shedding.
    pub priority: i32,
    pub on_error: OnError,
    /// Runs even after a filter requested `stop_filter_processing`.
    pub overrides_stop: bool,
}

impl FilterInfo {
    pub fn new(name: impl Into<String>, filter_type: FilterType, order: i32) -> Self {
        Self {
            name: name.into(),
            filter_type,
            order,
            priority: 0,
            on_error: OnError::Continue,
            overrides_stop: false,
        }
    }

    pub fn inbound(name: impl Into<String>, order: i32) -> Self {
        Self::new(name, FilterType::Inbound, order)
    }

    pub fn outbound(name: impl Into<String>, order: i32) -> Self {
        Self::new(name, FilterType::Outbound, order)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn abort_on_error(mut self) -> Self {
        self.on_error = OnError::Abort;
        self
    }

    pub fn overrides_stop_processing(mut self) -> Self {
        self.overrides_stop = true;
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FilterError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("filter panicked: {0}")]
    Panicked(String),

    #[error("filter {name} exceeded its concurrency limit of {limit}")]
    ConcurrencyExceeded { name: String, limit: usize },
}

impl FilterError {
    pub fn failed(message: impl Into<String>) -> Self {
        FilterError::Failed(message.into())
    }
}

/// Outcome of one filter (or endpoint) on one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterExecution {
    pub name: String,
    pub filter_type: FilterType,
    pub status: ExecutionStatus,
    #[serde(serialize_with = "as_micros")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn as_micros<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_micros() as u64)
}

impl fmt::Display for FilterExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]{}us",
            self.name,
            self.status.as_str(),
            self.duration.as_micros()
        )
    }
}

/// Access to the session carried by a message.
pub trait FilterMessage: Send + Sync + fmt::Debug {
    fn session(&self) -> &RequestSession;
    fn session_mut(&mut self) -> &mut RequestSession;
}

impl FilterMessage for HttpRequestMessage {
    fn session(&self) -> &RequestSession {
        HttpRequestMessage::session(self)
    }

    fn session_mut(&mut self) -> &mut RequestSession {
        HttpRequestMessage::session_mut(self)
    }
}

impl FilterMessage for HttpResponseMessage {
    fn session(&self) -> &RequestSession {
        HttpResponseMessage::session(self)
    }

    fn session_mut(&mut self) -> &mut RequestSession {
        HttpResponseMessage::session_mut(self)
    }
}

/// A unit of pipeline logic over messages of type `M`.
pub trait Filter<M>: Send + Sync {
    fn info(&self) -> &FilterInfo;

    fn should_filter(&self, _message: &M) -> bool {
        true
    }

    fn apply<'a>(&'a self, message: &'a mut M) -> BoxFuture<'a, Result<(), FilterError>>;
}

/// A filter that completes without suspending.
pub trait SyncFilter<M>: Send + Sync {
    fn info(&self) -> &FilterInfo;

    fn should_filter(&self, _message: &M) -> bool {
        true
    }

    fn apply_sync(&self, message: &mut M) -> Result<(), FilterError>;
}

/// Adapts a `SyncFilter` to `Filter`.
pub struct Synchronous<F>(pub F);

impl<M, F> Filter<M> for Synchronous<F>
where
    M: Send,
    F: SyncFilter<M>,
{
    fn info(&self) -> &FilterInfo {
        self.0.info()
    }

    fn should_filter(&self, message: &M) -> bool {
        self.0.should_filter(message)
    }

    fn apply<'a>(&'a self, message: &'a mut M) -> BoxFuture<'a, Result<(), FilterError>> {
        // Evaluated on first poll so a panic surfaces inside the chain's guard.
        Box::pin(async move { self.0.apply_sync(message) })
    }
}

/// A synchronous filter built from a closure.
pub struct FnFilter<F> {
    info: FilterInfo,
    f: F,
}

impl<F> FnFilter<F> {
    pub fn new(info: FilterInfo, f: F) -> Self {
        Self { info, f }
    }
}

impl<M, F> SyncFilter<M> for FnFilter<F>
where
    F: Fn(&mut M) -> Result<(), FilterError> + Send + Sync,
{
    fn info(&self) -> &FilterInfo {
        &self.info
    }

    fn apply_sync(&self, message: &mut M) -> Result<(), FilterError> {
        (self.f)(message)
    }
}

/// Produces the response for a request. Endpoints never fail: every
/// outcome, including errors, is a response.
pub trait Endpoint: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, request: HttpRequestMessage) -> BoxFuture<'_, HttpResponseMessage>;
}
