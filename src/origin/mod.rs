//! Origins: the backend services requests are proxied to.
//!
//! # Data Flow
//! ```text
//! ProxyEndpoint
//!     → OriginManager::get(session.origin)
//!     → Origin::connect (server selection + admission) → OriginConnection
//!     → OriginConnection::send (headers + body) → OriginResponse
//!     → OriginConnection::release(outcome)   (exactly once, consumes the connection)
//!     → Origin::record_proxy_request_end      (exactly once per logical request)
//! ```
//!
//! # Design Decisions
//! - Connections are owned values; `release` takes `Box<Self>` so a second
//!   release cannot compile and dropping without release still frees the slot
//! - Retry budget adjustments go through the session, not origin-global state
//! - `http.rs` is the hyper-backed implementation; tests plug in scripted origins

pub mod http;
pub mod manager;

use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::attempts::RequestAttempt;
use crate::context::RequestSession;
use crate::load_balancer::backend::ServerInfo;
use crate::message::{BodyStream, Headers, HttpRequestMessage};
use crate::resilience::errors::ProxyError;

pub use self::http::HttpOrigin;
pub use manager::OriginManager;

/// Response header an origin sets to forbid retrying this request.
pub const NO_RETRY_HEADER: &str = "x-origin-no-retry";

/// Response header carrying the origin's own processing time in ms.
pub const ORIGIN_DURATION_HEADER: &str = "x-origin-duration-ms";

/// Request as written to the origin for one attempt.
pub struct OutboundRequest {
    pub method: ::http::Method,
    pub path_and_query: String,
    pub headers: Headers,
    /// False when the request carries no body at all (sent without framing).
    pub has_body: bool,
    pub body: BodyStream,
}

/// Response head plus streaming body from the origin.
pub struct OriginResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: BodyStream,
}

impl std::fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// How a connection is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Exchange completed normally.
    Success,
    /// Origin answered with a failure status; the connection itself is fine.
    ServerError,
    /// Transport failure; discard the connection and count it against the server.
    Broken,
    /// Client went away, stalled its upload, or the request was never sent;
    /// discard without health impact.
    Abandoned,
}

/// Connection acquisition failed.
#[derive(Debug, Clone)]
pub struct ConnectFailure {
    pub error: ProxyError,
    /// Server that was chosen, if selection got that far.
    pub server: Option<ServerInfo>,
}

impl ConnectFailure {
    pub fn new(error: ProxyError, server: Option<ServerInfo>) -> Self {
        Self { error, server }
    }
}

/// A connection to one origin server, used for exactly one attempt.
pub trait OriginConnection: Send {
    fn server(&self) -> &ServerInfo;

    fn send(&mut self, request: OutboundRequest) -> BoxFuture<'_, Result<OriginResponse, ProxyError>>;

    fn release(self: Box<Self>, outcome: ReleaseOutcome);
}

/// A backend service.
pub trait Origin: Send + Sync {
    fn name(&self) -> &str;

    /// Select a server and acquire a connection for attempt number `attempt`.
    fn connect<'a>(
        &'a self,
        request: &'a HttpRequestMessage,
        attempt: u32,
        connect_timeout: Duration,
    ) -> BoxFuture<'a, Result<Box<dyn OriginConnection>, ConnectFailure>>;

    fn max_retries_for_request(&self, session: &RequestSession) -> i32;

    /// Called once per failed attempt before the retry decision.
    fn adjust_retry_policy_if_needed(&self, _request: &mut HttpRequestMessage) {}

    /// Called for failure-status responses, with the response head.
    fn origin_retry_policy_adjustment_if_needed(
        &self,
        _request: &mut HttpRequestMessage,
        _response: &OriginResponse,
    ) {
    }

    /// Called exactly once when the logical request has finished.
    fn record_proxy_request_end(&self, _session: &RequestSession) {}

    fn new_request_attempt(
        &self,
        server: Option<&ServerInfo>,
        session: &RequestSession,
        read_timeout: Duration,
        connect_timeout: Duration,
    ) -> RequestAttempt {
        RequestAttempt::new(
            self.name(),
            server,
            read_timeout,
            connect_timeout,
            session.retry_budget(),
        )
    }
}
