//! hyper-backed origin.
//!
//! # Responsibilities
//! - Admission: per-origin concurrency limit, per-server max connections
//! - Server selection through the origin's `BackendPool`
//! - Send requests with the pooled hyper-util client, streaming both bodies
//! - Classify transport failures into `ErrorType`
//! - Passive health marking and circuit breaking on release

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body as AxumBody;
use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{Request, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::schema::{HealthCheckConfig, OriginConfig, RetryConfig};
use crate::context::RequestSession;
use crate::load_balancer::backend::{Backend, BackendConnectionGuard, ServerInfo};
use crate::load_balancer::pool::{BackendPool, SelectError};
use crate::message::{BodyError, Headers, HttpRequestMessage};
use crate::origin::{
    ConnectFailure, Origin, OriginConnection, OriginResponse, OutboundRequest, ReleaseOutcome,
    NO_RETRY_HEADER,
};
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::concurrency::{ConcurrencyLimiter, ConcurrencyPermit};
use crate::resilience::errors::{ErrorType, ProxyError};

pub type HttpClient = Client<HttpConnector, AxumBody>;

/// Build the pooled client used for one origin.
pub fn build_client(connect_timeout: Duration) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(connect_timeout));
    connector.set_nodelay(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

#[derive(Debug, Clone, Copy)]
struct HealthThresholds {
    healthy: usize,
    unhealthy: usize,
}

/// An origin whose servers speak HTTP/1.1.
pub struct HttpOrigin {
    name: String,
    pool: BackendPool,
    client: HttpClient,
    max_retries: i32,
    limiter: Arc<ConcurrencyLimiter>,
    breaker: Arc<CircuitBreaker>,
    health: HealthThresholds,
    completed_requests: AtomicU64,
}

impl HttpOrigin {
    pub fn from_config(
        config: &OriginConfig,
        retries: &RetryConfig,
        health: &HealthCheckConfig,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            name: config.name.clone(),
            pool: BackendPool::from_config(config),
            client: build_client(connect_timeout),
            max_retries: config.max_retries.unwrap_or(retries.default_max_retries),
            limiter: ConcurrencyLimiter::new(config.name.clone(), config.concurrency_limit),
            breaker: Arc::new(CircuitBreaker::new(
                retries.breaker_failure_threshold,
                Duration::from_secs(retries.breaker_recovery_secs),
            )),
            health: HealthThresholds {
                healthy: health.healthy_threshold as usize,
                unhealthy: health.unhealthy_threshold as usize,
            },
            completed_requests: AtomicU64::new(0),
        }
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        self.pool.all_backends()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn completed_requests(&self) -> u64 {
        self.completed_requests.load(Ordering::Relaxed)
    }
}

/// Servers this request already tried, from its attempt ledger.
fn tried_servers(session: &RequestSession) -> Vec<SocketAddr> {
    session
        .attempts()
        .iter()
        .filter_map(|a| {
            let host = a.host.as_deref()?;
            let port = a.port?;
            format!("{host}:{port}").parse().ok()
        })
        .collect()
}

impl Origin for HttpOrigin {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect<'a>(
        &'a self,
        request: &'a HttpRequestMessage,
        attempt: u32,
        _connect_timeout: Duration,
    ) -> BoxFuture<'a, Result<Box<dyn OriginConnection>, ConnectFailure>> {
        // TCP connect happens lazily inside the pooled client, bounded by the
        // connector's timeout.
        Box::pin(async move {
            let Some(permit) = self.limiter.try_acquire() else {
                return Err(ConnectFailure::new(
                    ProxyError::new(
                        ErrorType::OriginConcurrencyExceeded,
                        format!(
                            "origin {} exceeded its concurrency limit of {}",
                            self.name,
                            self.limiter.limit()
                        ),
                    ),
                    None,
                ));
            };

            let tried = tried_servers(request.session());
            let guard = self.pool.select(&tried).map_err(|e| match e {
                SelectError::NoServers(_) => ConnectFailure::new(
                    ProxyError::new(ErrorType::NoAvailableServers, e.to_string()),
                    None,
                ),
                SelectError::MaxConnections(ref server) => ConnectFailure::new(
                    ProxyError::new(ErrorType::OriginServerMaxConns, e.to_string()),
                    Some(server.clone()),
                ),
            })?;

            tracing::debug!(
                request_id = %request.session().id(),
                origin = %self.name,
                server = %guard.addr,
                attempt,
                "Acquired origin connection"
            );

            Ok(Box::new(HttpConnection {
                client: self.client.clone(),
                backend: Arc::clone(&guard.backend),
                server: guard.info.clone(),
                held: Some((guard, permit)),
                breaker: Arc::clone(&self.breaker),
                health: self.health,
            }) as Box<dyn OriginConnection>)
        })
    }

    fn max_retries_for_request(&self, _session: &RequestSession) -> i32 {
        self.max_retries
    }

    fn adjust_retry_policy_if_needed(&self, request: &mut HttpRequestMessage) {
        if self.breaker.is_open() && request.session().retry_budget() > 0 {
            tracing::info!(
                request_id = %request.session().id(),
                origin = %self.name,
                "Circuit open, disabling retries"
            );
            request.session_mut().set_retry_budget(0);
        }
    }

    fn origin_retry_policy_adjustment_if_needed(
        &self,
        request: &mut HttpRequestMessage,
        response: &OriginResponse,
    ) {
        if response.headers.contains_value(NO_RETRY_HEADER, "true") {
            tracing::debug!(
                request_id = %request.session().id(),
                origin = %self.name,
                "Origin asked not to retry"
            );
            request.session_mut().set_retry_budget(0);
        }
    }

    fn record_proxy_request_end(&self, session: &RequestSession) {
        self.completed_requests.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            request_id = %session.id(),
            origin = %self.name,
            attempts = session.attempts().len(),
            "Proxy request finished"
        );
    }
}

struct HttpConnection {
    client: HttpClient,
    backend: Arc<Backend>,
    server: ServerInfo,
    /// Connection slot and origin permit; moved into the response body
    /// stream so they stay held until the body is done.
    held: Option<(BackendConnectionGuard, ConcurrencyPermit)>,
    breaker: Arc<CircuitBreaker>,
    health: HealthThresholds,
}

impl HttpConnection {
    fn build_request(&self, outbound: OutboundRequest) -> Result<Request<AxumBody>, ProxyError> {
        let invalid = |e: &dyn std::fmt::Display| {
            ProxyError::new(ErrorType::Other, format!("invalid outbound request: {e}"))
        };

        let authority = Authority::from_str(&self.backend.addr.to_string()).map_err(|e| invalid(&e))?;
        let path = PathAndQuery::from_str(&outbound.path_and_query).map_err(|e| invalid(&e))?;
        let uri = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(authority)
            .path_and_query(path)
            .build()
            .map_err(|e| invalid(&e))?;

        let mut request = Request::builder()
            .method(outbound.method)
            .uri(uri)
            .body(if outbound.has_body {
                AxumBody::from_stream(outbound.body)
            } else {
                AxumBody::empty()
            })
            .map_err(|e| invalid(&e))?;
        *request.headers_mut() = outbound.headers.to_header_map();
        Ok(request)
    }
}

impl OriginConnection for HttpConnection {
    fn server(&self) -> &ServerInfo {
        &self.server
    }

    fn send(&mut self, outbound: OutboundRequest) -> BoxFuture<'_, Result<OriginResponse, ProxyError>> {
        Box::pin(async move {
            let request = self.build_request(outbound)?;
            let response = self.client.request(request).await.map_err(classify)?;

            let (parts, incoming) = response.into_parts();
            let held = self.held.take();
            let body = AxumBody::new(incoming)
                .into_data_stream()
                .map(move |chunk| {
                    let _held = &held;
                    chunk.map_err(|e| BodyError::Read(e.to_string()))
                })
                .boxed();

            Ok(OriginResponse {
                status: parts.status.as_u16(),
                headers: Headers::from(&parts.headers),
                body,
            })
        })
    }

    fn release(self: Box<Self>, outcome: ReleaseOutcome) {
        match outcome {
            ReleaseOutcome::Success => {
                self.backend.mark_success(self.health.healthy);
                self.breaker.record_success();
            }
            ReleaseOutcome::ServerError | ReleaseOutcome::Broken => {
                self.backend.mark_failure(self.health.unhealthy);
                self.breaker.record_failure();
            }
            ReleaseOutcome::Abandoned => {}
        }
        tracing::trace!(server = %self.backend.addr, ?outcome, "Released origin connection");
    }
}

/// Map a client error onto the proxy failure taxonomy.
fn classify(err: hyper_util::client::legacy::Error) -> ProxyError {
    if err.is_connect() {
        return ProxyError::new(ErrorType::ConnectError, "failed to connect to origin").with_cause(err);
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = source {
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() || hyper_err.is_closed() || hyper_err.is_canceled() {
                return ProxyError::new(ErrorType::ResetConnection, "origin closed the connection")
                    .with_cause(err);
            }
            if hyper_err.is_timeout() {
                return ProxyError::new(ErrorType::ReadTimeout, "origin timed out").with_cause(err);
            }
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind::*;
            if matches!(io.kind(), ConnectionReset | ConnectionAborted | BrokenPipe | UnexpectedEof) {
                return ProxyError::new(ErrorType::ResetConnection, "origin reset the connection")
                    .with_cause(err);
            }
        }
        source = e.source();
    }

    ProxyError::new(ErrorType::Other, "origin request failed").with_cause(err)
}
