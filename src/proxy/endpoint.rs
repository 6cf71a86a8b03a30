//! The proxy endpoint: drives one logical request through origin attempts.
//!
//! # Responsibilities
//! - Resolve the session's origin and seed the retry budget
//! - Acquire a connection, send the request, classify the outcome
//! - Retry on a fresh connection while the policy allows it
//! - Keep the passport and attempt ledger in step with every attempt
//! - Turn the final outcome into a response (origin or error)

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;

use crate::filters::Endpoint;
use crate::message::{Body, HttpRequestMessage, HttpResponseMessage};
use crate::observability::metrics::{MetricsSink, ProxyCompletion};
use crate::origin::{
    Origin, OriginManager, OriginResponse, OutboundRequest, ReleaseOutcome, ORIGIN_DURATION_HEADER,
};
use crate::passport::PassportState;
use crate::proxy::error_endpoint::ErrorEndpoint;
use crate::resilience::errors::{ErrorType, ProxyError, StatusCategory};
use crate::resilience::retries::{GiveUpReason, RetryDecision, RetryInput, RetryPolicy};
use crate::resilience::timeouts::TimeoutManager;
use crate::security::headers::strip_hop_by_hop;

/// Terminal endpoint that proxies to the origin named on the session.
pub struct ProxyEndpoint {
    origins: Arc<OriginManager>,
    timeouts: Arc<TimeoutManager>,
    retry_policy: RetryPolicy,
    error_endpoint: ErrorEndpoint,
    metrics: Arc<dyn MetricsSink>,
}

impl ProxyEndpoint {
    pub const NAME: &'static str = "proxy";

    pub fn new(
        origins: Arc<OriginManager>,
        timeouts: Arc<TimeoutManager>,
        retry_policy: RetryPolicy,
        error_endpoint: ErrorEndpoint,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            origins,
            timeouts,
            retry_policy,
            error_endpoint,
            metrics,
        }
    }

    /// Proxy `request` and produce the response to send downstream.
    pub async fn proxy(&self, mut request: HttpRequestMessage) -> HttpResponseMessage {
        let origin_name = request.session().origin().map(str::to_string);
        let origin = origin_name.as_deref().and_then(|name| self.origins.get(name));

        let Some(origin) = origin else {
            let error = ProxyError::new(
                ErrorType::OriginNotFound,
                match &origin_name {
                    Some(name) => format!("unknown origin {name}"),
                    None => "no origin selected for request".to_string(),
                },
            );
            return self.finish("unknown", request, Err(error));
        };

        let result = self.proxy_to(origin.as_ref(), &mut request).await;
        origin.record_proxy_request_end(request.session());
        self.finish(origin.name(), request, result)
    }

    async fn proxy_to(
        &self,
        origin: &dyn Origin,
        request: &mut HttpRequestMessage,
    ) -> Result<OriginResponse, ProxyError> {
        let budget = origin.max_retries_for_request(request.session());
        request.session_mut().set_retry_budget(budget);
        let connect_timeout = self.timeouts.connect_timeout(origin.name());

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if request.session().is_cancelled() {
                return Err(ProxyError::client_cancelled());
            }

            if attempt > 1 {
                request.session_mut().passport_mut().add(PassportState::OriginRetryStart);
                request.body_mut().reset_reader().map_err(|e| {
                    ProxyError::new(ErrorType::Other, "request body cannot be replayed").with_cause(e)
                })?;
                let delay = self.retry_policy.backoff(attempt - 1);
                if !delay.is_zero() {
                    let cancel = request.session().cancel_handle().clone();
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ProxyError::client_cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            let read_timeout = self.timeouts.read_timeout(origin.name(), request.session());
            let started = Instant::now();
            request
                .session_mut()
                .passport_mut()
                .add(PassportState::OriginConnAcquireStart);

            let mut conn = match origin.connect(request, attempt, connect_timeout).await {
                Ok(conn) => {
                    let record = origin.new_request_attempt(
                        Some(conn.server()),
                        request.session(),
                        read_timeout,
                        connect_timeout,
                    );
                    let session = request.session_mut();
                    session.passport_mut().add(PassportState::OriginConnAcquireEnd);
                    session.attempts_mut().push(record);
                    conn
                }
                Err(failure) => {
                    let mut record = origin.new_request_attempt(
                        failure.server.as_ref(),
                        request.session(),
                        read_timeout,
                        connect_timeout,
                    );
                    record.set_error(&failure.error, started.elapsed());
                    let session = request.session_mut();
                    session.passport_mut().add(PassportState::OriginConnAcquireFailed);
                    session.attempts_mut().push(record);

                    match self.should_retry(origin, request, attempt, &failure.error, None).await {
                        RetryDecision::Retry => continue,
                        RetryDecision::GiveUp(_) => return Err(failure.error),
                    }
                }
            };

            let body = match request.body_mut().take_outbound() {
                Ok(body) => body,
                Err(e) => {
                    conn.release(ReleaseOutcome::Abandoned);
                    let error = ProxyError::new(ErrorType::Other, "request body unavailable").with_cause(e);
                    self.record_attempt_error(request, &error, started);
                    return Err(error);
                }
            };
            let request_body = request.body();
            let has_body = !(request_body.is_complete() && request_body.is_empty());
            let mut headers = request.headers().clone();
            strip_hop_by_hop(&mut headers);
            if has_body && request_body.is_complete() {
                headers.set("Content-Length", request_body.len().to_string());
            }
            let outbound = OutboundRequest {
                method: request.method().clone(),
                path_and_query: request.path_and_query(),
                headers,
                has_body,
                body,
            };

            request
                .session_mut()
                .passport_mut()
                .add(PassportState::OutReqHeadersSending);
            let cancel = request.session().cancel_handle().clone();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProxyError::client_cancelled()),
                sent = tokio::time::timeout(read_timeout, conn.send(outbound)) => match sent {
                    Ok(result) => result,
                    Err(_) => Err(ProxyError::read_timeout(read_timeout)),
                },
            };
            request.record_body_progress();

            match result {
                Ok(response) => {
                    let status = response.status;
                    let session = request.session_mut();
                    session.passport_mut().add(PassportState::InRespHeadersReceived);
                    if let Some(record) = session.attempts_mut().final_attempt_mut() {
                        record.complete(status, started.elapsed());
                    }

                    let Some(error_type) = self.retry_policy.classify_status(status) else {
                        conn.release(ReleaseOutcome::Success);
                        return Ok(response);
                    };

                    origin.origin_retry_policy_adjustment_if_needed(request, &response);
                    conn.release(ReleaseOutcome::ServerError);
                    let error = ProxyError::new(error_type, format!("origin responded {status}"));
                    if let Some(record) = request.session_mut().attempts_mut().final_attempt_mut() {
                        record.error_type = Some(error_type.as_str().to_string());
                    }

                    match self.should_retry(origin, request, attempt, &error, Some(status)).await {
                        RetryDecision::Retry => continue,
                        // Forward the origin's own failure response.
                        RetryDecision::GiveUp(_) => return Ok(response),
                    }
                }
                Err(error) => {
                    let passport_state = match error.error_type() {
                        ErrorType::ReadTimeout => PassportState::OriginChReadTimeout,
                        ErrorType::ClientCancelled => PassportState::InReqCancelled,
                        _ => PassportState::OriginChIoEx,
                    };
                    // A timeout while the client is still uploading is not the origin's fault.
                    let upload_stalled = error.error_type() == ErrorType::ReadTimeout
                        && has_body
                        && !request.body().is_complete();
                    let outcome = if error.error_type() == ErrorType::ClientCancelled || upload_stalled {
                        ReleaseOutcome::Abandoned
                    } else {
                        ReleaseOutcome::Broken
                    };
                    let passport = request.session_mut().passport_mut();
                    passport.add(passport_state);
                    if outcome == ReleaseOutcome::Broken {
                        passport.add(PassportState::OriginConnBroken);
                    }
                    conn.release(outcome);
                    self.record_attempt_error(request, &error, started);

                    match self.should_retry(origin, request, attempt, &error, None).await {
                        RetryDecision::Retry => continue,
                        RetryDecision::GiveUp(_) => return Err(error),
                    }
                }
            }
        }
    }

    fn record_attempt_error(&self, request: &mut HttpRequestMessage, error: &ProxyError, started: Instant) {
        if let Some(record) = request.session_mut().attempts_mut().final_attempt_mut() {
            record.set_error(error, started.elapsed());
        }
    }

    async fn should_retry(
        &self,
        origin: &dyn Origin,
        request: &mut HttpRequestMessage,
        attempt: u32,
        error: &ProxyError,
        status: Option<u16>,
    ) -> RetryDecision {
        origin.adjust_retry_policy_if_needed(request);

        let mut decision = self.retry_policy.decide(&self.retry_input(request, attempt, error, status));

        // A body nothing has started streaming can still be read in full now.
        if decision == RetryDecision::GiveUp(GiveUpReason::NotReplayable)
            && !request.body().is_source_taken()
        {
            match request.body_mut().buffer_remaining().await {
                Ok(()) => {
                    request.record_body_progress();
                    decision = self.retry_policy.decide(&self.retry_input(request, attempt, error, status));
                }
                Err(e) => tracing::debug!(
                    request_id = %request.session().id(),
                    error = %e,
                    "Could not buffer request body for retry"
                ),
            }
        }

        match decision {
            RetryDecision::Retry => {
                tracing::info!(
                    request_id = %request.session().id(),
                    origin = %origin.name(),
                    attempt,
                    error_type = %error.error_type(),
                    status = ?status,
                    "Retrying origin request"
                );
                self.metrics.proxy_retry(origin.name(), error.error_type());
            }
            RetryDecision::GiveUp(reason) => {
                tracing::debug!(
                    request_id = %request.session().id(),
                    origin = %origin.name(),
                    attempt,
                    error_type = %error.error_type(),
                    reason = reason.as_str(),
                    "Not retrying origin request"
                );
            }
        }
        decision
    }

    fn retry_input(
        &self,
        request: &HttpRequestMessage,
        attempt: u32,
        error: &ProxyError,
        status: Option<u16>,
    ) -> RetryInput {
        RetryInput {
            attempt,
            retry_budget: request.session().retry_budget(),
            error_type: error.error_type(),
            status,
            replayable: request.is_replayable(),
            cancelled: request.session().is_cancelled(),
        }
    }

    fn finish(
        &self,
        origin: &str,
        request: HttpRequestMessage,
        result: Result<OriginResponse, ProxyError>,
    ) -> HttpResponseMessage {
        let info = request.info();
        let mut session = request.into_session();

        let (response, error_type) = match result {
            Ok(origin_response) => {
                let mut headers = origin_response.headers;
                strip_hop_by_hop(&mut headers);
                if let Some(ms) = headers
                    .get(ORIGIN_DURATION_HEADER)
                    .and_then(|v| v.trim().parse::<u64>().ok())
                {
                    session.set_origin_reported_duration(Duration::from_millis(ms));
                }
                let error_type = self.retry_policy.classify_status(origin_response.status);
                let response = HttpResponseMessage::new(session, info, origin_response.status)
                    .with_headers(headers)
                    .with_body(Body::from_stream(origin_response.body, 0));
                (response, error_type)
            }
            Err(error) => {
                let error_type = error.error_type();
                session.set_error(error);
                (self.error_endpoint.render(session, info), Some(error_type))
            }
        };

        let session = response.session();
        let duration = session.elapsed();
        let attempts = session.attempts().len() as u32;
        let category = error_type.map_or(StatusCategory::Success, |t| t.status_category());

        tracing::debug!(
            request_id = %session.id(),
            origin,
            status = response.status(),
            attempts,
            category = category.as_str(),
            duration_ms = duration.as_millis() as u64,
            time_added_to_origin_ms = ?session.time_added_to_origin_ms(),
            "Proxy request completed"
        );
        self.metrics.proxy_completed(&ProxyCompletion {
            origin,
            status: response.status(),
            category,
            error_type,
            attempts,
            duration,
        });
        response
    }
}

impl Endpoint for ProxyEndpoint {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, request: HttpRequestMessage) -> BoxFuture<'_, HttpResponseMessage> {
        Box::pin(self.proxy(request))
    }
}
