//! Retry decisions for the origin proxy loop.
//!
//! # Responsibilities
//! - Classify origin response statuses (success / retryable / plain failure)
//! - Decide whether a failed attempt may be retried on a new connection
//! - Compute the delay before the retry
//!
//! # Design Decisions
//! - A retry needs all of: replayable body, remaining budget, retryable class
//! - Admission failures (max conns, concurrency, no servers) are never retried
//! - The budget lives on the session so an origin can shrink it mid-request

use std::collections::HashSet;
use std::time::Duration;

use crate::config::schema::RetryConfig;
use crate::resilience::backoff::retry_delay;
use crate::resilience::errors::ErrorType;

/// Facts about a failed attempt that drive the retry decision.
#[derive(Debug, Clone, Copy)]
pub struct RetryInput {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    /// Remaining retry budget on the session (may be negative after adjustment).
    pub retry_budget: i32,
    pub error_type: ErrorType,
    /// Origin status when the failure was a response, `None` for transport errors.
    pub status: Option<u16>,
    pub replayable: bool,
    pub cancelled: bool,
}

/// Why no further attempt is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    Cancelled,
    NotRetryable,
    NotReplayable,
    BudgetExhausted,
}

impl GiveUpReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GiveUpReason::Cancelled => "cancelled",
            GiveUpReason::NotRetryable => "not_retryable",
            GiveUpReason::NotReplayable => "not_replayable",
            GiveUpReason::BudgetExhausted => "budget_exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp(GiveUpReason),
}

/// Retry policy shared by every request through a proxy endpoint.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    retryable_statuses: HashSet<u16>,
    backoff_base_ms: u64,
    backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            retryable_statuses: config.retryable_statuses.iter().copied().collect(),
            backoff_base_ms: config.backoff_base_ms,
            backoff_max_ms: config.backoff_max_ms,
        }
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Classify an origin status. `None` means the response counts as a success.
    pub fn classify_status(&self, status: u16) -> Option<ErrorType> {
        if self.is_retryable_status(status) {
            Some(ErrorType::ServiceUnavailable)
        } else if status >= 500 {
            Some(ErrorType::ErrorStatusResponse)
        } else {
            None
        }
    }

    pub fn decide(&self, input: &RetryInput) -> RetryDecision {
        if input.cancelled {
            return RetryDecision::GiveUp(GiveUpReason::Cancelled);
        }

        let retryable_class = match input.status {
            Some(status) => self.is_retryable_status(status),
            None => input.error_type.is_retryable(),
        };
        if !retryable_class {
            return RetryDecision::GiveUp(GiveUpReason::NotRetryable);
        }

        // Retries already spent equals attempt - 1.
        if i64::from(input.attempt) > i64::from(input.retry_budget) {
            return RetryDecision::GiveUp(GiveUpReason::BudgetExhausted);
        }

        if !input.replayable {
            return RetryDecision::GiveUp(GiveUpReason::NotReplayable);
        }

        RetryDecision::Retry
    }

    /// Delay before retry number `retry` (1 = first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        retry_delay(retry, self.backoff_base_ms, self.backoff_max_ms)
    }
}
