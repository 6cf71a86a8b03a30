//! Ordered execution of one filter type.
//!
//! # Responsibilities
//! - Run filters strictly sequentially in ascending order
//! - Skip filters that are disabled, below the priority floor, or not applicable
//! - Bound each filter's concurrency; fail fast when exceeded
//! - Isolate failures and panics, continuing or aborting per filter
//!
//! # State Machine
//! ```text
//! PENDING → RUNNING (each filter in order) → COMPLETED
//!                                          → ABORTED (stop requested, or a fatal filter failure)
//! ```
//! Only the terminal state is reported.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;

use crate::config::schema::FilterConfig;
use crate::filters::filter::{
    ExecutionStatus, Filter, FilterError, FilterExecution, FilterMessage, FilterType, OnError,
};
use crate::observability::MetricsSink;
use crate::passport::PassportState;
use crate::resilience::concurrency::ConcurrencyLimiter;
use crate::resilience::errors::{ErrorType, ProxyError};

/// Terminal state of one chain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Completed,
    Aborted,
}

/// Why a chain pass ended early.
#[derive(Debug, Clone)]
pub enum AbortCause {
    /// `should_stop_filter_processing` was set on the session.
    StopRequested,
    /// A filter failed fatally or exceeded its concurrency limit.
    FilterFailed { filter: String, error: FilterError },
}

#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub state: ChainState,
    pub cause: Option<AbortCause>,
}

impl ChainOutcome {
    fn completed() -> Self {
        Self {
            state: ChainState::Completed,
            cause: None,
        }
    }

    fn aborted(cause: AbortCause) -> Self {
        Self {
            state: ChainState::Aborted,
            cause: Some(cause),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.state == ChainState::Aborted
    }

    /// True if a filter failure (not a stop request) ended the chain.
    pub fn failed(&self) -> bool {
        matches!(self.cause, Some(AbortCause::FilterFailed { .. }))
    }
}

struct ChainEntry<M> {
    filter: Arc<dyn Filter<M>>,
    limiter: Arc<ConcurrencyLimiter>,
    enabled: bool,
}

/// All filters of one type, sorted for execution.
pub struct FilterChain<M> {
    filter_type: FilterType,
    entries: Vec<ChainEntry<M>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<M: FilterMessage> FilterChain<M> {
    /// Sort `filters` by order (stable, so ties keep registration order) and
    /// attach a concurrency limiter to each.
    pub fn new(
        filter_type: FilterType,
        mut filters: Vec<Arc<dyn Filter<M>>>,
        config: &FilterConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        filters.sort_by_key(|f| f.info().order);
        let entries = filters
            .into_iter()
            .map(|filter| {
                let info = filter.info();
                if info.filter_type != filter_type {
                    tracing::warn!(
                        filter = %info.name,
                        declared = %info.filter_type,
                        chain = %filter_type,
                        "Filter registered in a chain of another type"
                    );
                }
                let limit = config.concurrency_limit_for(&info.name, filter_type);
                ChainEntry {
                    limiter: ConcurrencyLimiter::new(info.name.clone(), limit),
                    enabled: !config.is_disabled(&info.name),
                    filter,
                }
            })
            .collect();
        Self {
            filter_type,
            entries,
            metrics,
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.filter.info().name.as_str())
            .collect()
    }

    pub async fn run(&self, message: &mut M) -> ChainOutcome {
        let (start_state, end_state) = passport_states(self.filter_type);
        message.session_mut().passport_mut().add(start_state);

        let outcome = self.run_entries(message).await;

        message.session_mut().passport_mut().add(end_state);
        tracing::trace!(chain = %self.filter_type, state = ?outcome.state, "Filter chain finished");
        outcome
    }

    async fn run_entries(&self, message: &mut M) -> ChainOutcome {
        let mut stopped = false;

        for entry in &self.entries {
            let info = entry.filter.info();

            if message.session().should_stop_filter_processing() {
                stopped = true;
                if !info.overrides_stop {
                    tracing::trace!(filter = %info.name, "Stop requested, not running filter");
                    continue;
                }
            }

            if !entry.enabled || info.priority < message.session().filter_priority_floor() {
                self.record(message, &info.name, ExecutionStatus::Disabled, Duration::ZERO, None);
                continue;
            }

            if !entry.filter.should_filter(message) {
                self.record(message, &info.name, ExecutionStatus::Skipped, Duration::ZERO, None);
                continue;
            }

            let Some(permit) = entry.limiter.try_acquire() else {
                let error = FilterError::ConcurrencyExceeded {
                    name: info.name.clone(),
                    limit: entry.limiter.limit(),
                };
                tracing::warn!(
                    request_id = %message.session().id(),
                    filter = %info.name,
                    limit = entry.limiter.limit(),
                    "Filter concurrency limit exceeded"
                );
                self.record(
                    message,
                    &info.name,
                    ExecutionStatus::Failed,
                    Duration::ZERO,
                    Some(error.to_string()),
                );
                set_session_error(
                    message,
                    ProxyError::new(ErrorType::FilterConcurrencyExceeded, error.to_string()),
                );
                return ChainOutcome::aborted(AbortCause::FilterFailed {
                    filter: info.name.clone(),
                    error,
                });
            };

            let started = Instant::now();
            let result = AssertUnwindSafe(entry.filter.apply(message))
                .catch_unwind()
                .await;
            drop(permit);
            let elapsed = started.elapsed();

            let error = match result {
                Ok(Ok(())) => {
                    self.record(message, &info.name, ExecutionStatus::Success, elapsed, None);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(panic) => FilterError::Panicked(panic_message(panic)),
            };

            tracing::warn!(
                request_id = %message.session().id(),
                filter = %info.name,
                error = %error,
                "Filter failed"
            );
            self.record(
                message,
                &info.name,
                ExecutionStatus::Failed,
                elapsed,
                Some(error.to_string()),
            );

            if info.on_error == OnError::Abort {
                let proxy_error = match &error {
                    FilterError::Proxy(e) => e.clone(),
                    other => ProxyError::new(ErrorType::Other, format!("filter {}: {}", info.name, other)),
                };
                set_session_error(message, proxy_error);
                return ChainOutcome::aborted(AbortCause::FilterFailed {
                    filter: info.name.clone(),
                    error,
                });
            }
        }

        if stopped || message.session().should_stop_filter_processing() {
            return ChainOutcome::aborted(AbortCause::StopRequested);
        }
        ChainOutcome::completed()
    }

    fn record(
        &self,
        message: &mut M,
        name: &str,
        status: ExecutionStatus,
        duration: Duration,
        error: Option<String>,
    ) {
        tracing::debug!(
            request_id = %message.session().id(),
            filter = %name,
            status = status.as_str(),
            duration_us = duration.as_micros() as u64,
            "Filter executed"
        );
        self.metrics
            .filter_executed(name, self.filter_type, status, duration);
        message.session_mut().record_filter_execution(FilterExecution {
            name: name.to_string(),
            filter_type: self.filter_type,
            status,
            duration,
            error,
        });
    }
}

/// Keep the first error; later failures do not overwrite the cause.
fn set_session_error<M: FilterMessage>(message: &mut M, error: ProxyError) {
    if message.session().error().is_none() {
        message.session_mut().set_error(error);
    }
}

fn passport_states(filter_type: FilterType) -> (PassportState, PassportState) {
    match filter_type {
        FilterType::Inbound => (PassportState::FiltersInboundStart, PassportState::FiltersInboundEnd),
        FilterType::Outbound => (PassportState::FiltersOutboundStart, PassportState::FiltersOutboundEnd),
        FilterType::Endpoint => (PassportState::FiltersEndpointStart, PassportState::FiltersEndpointEnd),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
