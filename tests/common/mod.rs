//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{stream, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use edge_proxy::config::schema::RetryConfig;
use edge_proxy::context::RequestSession;
use edge_proxy::load_balancer::backend::ServerInfo;
use edge_proxy::message::{Body, BodyError, Headers, HttpRequestMessage, HttpResponseMessage};
use edge_proxy::observability::NoopSink;
use edge_proxy::origin::{
    ConnectFailure, Origin, OriginConnection, OriginManager, OriginResponse, OutboundRequest,
    ReleaseOutcome,
};
use edge_proxy::proxy::{ErrorEndpoint, ProxyEndpoint};
use edge_proxy::resilience::errors::{ErrorType, ProxyError};
use edge_proxy::resilience::retries::RetryPolicy;
use edge_proxy::resilience::timeouts::TimeoutManager;

pub const SCRIPTED: &str = "scripted";

/// What the scripted origin does on one attempt.
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    StatusWithHeaders(u16, Vec<(&'static str, &'static str)>),
    ConnectFail(ErrorType),
    SendFail(ErrorType),
    /// Never answers.
    Hang,
}

#[derive(Debug, Default)]
pub struct Observed {
    /// Request body as received by each sent attempt.
    pub bodies: Vec<Bytes>,
    pub releases: Vec<ReleaseOutcome>,
}

/// In-memory origin replaying a script of outcomes.
pub struct ScriptedOrigin {
    steps: Mutex<VecDeque<Step>>,
    max_retries: i32,
    /// After this many attempts, `adjust_retry_policy_if_needed` sets the budget.
    adjust_after: Option<(usize, i32)>,
    pub observed: Arc<Mutex<Observed>>,
    pub request_ends: AtomicU32,
}

impl ScriptedOrigin {
    pub fn new(max_retries: i32, steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            max_retries,
            adjust_after: None,
            observed: Arc::new(Mutex::new(Observed::default())),
            request_ends: AtomicU32::new(0),
        }
    }

    pub fn adjust_budget_after(mut self, attempts: usize, budget: i32) -> Self {
        self.adjust_after = Some((attempts, budget));
        self
    }

    pub fn bodies(&self) -> Vec<Bytes> {
        self.observed.lock().unwrap().bodies.clone()
    }

    pub fn releases(&self) -> Vec<ReleaseOutcome> {
        self.observed.lock().unwrap().releases.clone()
    }
}

fn server(attempt: u32) -> ServerInfo {
    ServerInfo {
        host: format!("10.0.0.{attempt}"),
        port: 7001,
        zone: Some("us-east-1a".to_string()),
        region: Some("us-east-1".to_string()),
        app: Some("api".to_string()),
    }
}

impl Origin for ScriptedOrigin {
    fn name(&self) -> &str {
        SCRIPTED
    }

    fn connect<'a>(
        &'a self,
        _request: &'a HttpRequestMessage,
        attempt: u32,
        _connect_timeout: Duration,
    ) -> BoxFuture<'a, Result<Box<dyn OriginConnection>, ConnectFailure>> {
        Box::pin(async move {
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Status(200));
            match step {
                Step::ConnectFail(error_type) => {
                    let server = (error_type != ErrorType::NoAvailableServers).then(|| server(attempt));
                    Err(ConnectFailure::new(
                        ProxyError::new(error_type, "scripted connect failure"),
                        server,
                    ))
                }
                step => Ok(Box::new(ScriptedConnection {
                    server: server(attempt),
                    attempt,
                    step,
                    observed: Arc::clone(&self.observed),
                }) as Box<dyn OriginConnection>),
            }
        })
    }

    fn max_retries_for_request(&self, _session: &RequestSession) -> i32 {
        self.max_retries
    }

    fn adjust_retry_policy_if_needed(&self, request: &mut HttpRequestMessage) {
        if let Some((after, budget)) = self.adjust_after {
            if request.session().attempts().len() >= after {
                request.session_mut().set_retry_budget(budget);
            }
        }
    }

    fn origin_retry_policy_adjustment_if_needed(
        &self,
        request: &mut HttpRequestMessage,
        response: &OriginResponse,
    ) {
        if response.headers.contains_value("x-origin-no-retry", "true") {
            request.session_mut().set_retry_budget(0);
        }
    }

    fn record_proxy_request_end(&self, _session: &RequestSession) {
        self.request_ends.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedConnection {
    server: ServerInfo,
    attempt: u32,
    step: Step,
    observed: Arc<Mutex<Observed>>,
}

impl OriginConnection for ScriptedConnection {
    fn server(&self) -> &ServerInfo {
        &self.server
    }

    fn send(&mut self, request: OutboundRequest) -> BoxFuture<'_, Result<OriginResponse, ProxyError>> {
        Box::pin(async move {
            let mut body = Vec::new();
            let mut chunks = request.body;
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(chunk) => body.extend_from_slice(&chunk),
                    Err(_) => break,
                }
            }
            self.observed.lock().unwrap().bodies.push(Bytes::from(body));

            let (status, extra) = match &self.step {
                Step::Status(status) => (*status, Vec::new()),
                Step::StatusWithHeaders(status, headers) => (*status, headers.clone()),
                Step::SendFail(error_type) => {
                    return Err(ProxyError::new(*error_type, "scripted send failure"))
                }
                Step::Hang => std::future::pending().await,
                Step::ConnectFail(_) => unreachable!("connect failures never connect"),
            };

            let mut headers: Headers = extra.into_iter().collect();
            headers.add("X-Attempt", self.attempt.to_string());
            let payload = Bytes::from(format!("attempt {}", self.attempt));
            Ok(OriginResponse {
                status,
                headers,
                body: stream::once(async move { Ok::<_, BodyError>(payload) }).boxed(),
            })
        })
    }

    fn release(self: Box<Self>, outcome: ReleaseOutcome) {
        self.observed.lock().unwrap().releases.push(outcome);
    }
}

pub fn proxy_endpoint(origin: Arc<dyn Origin>, retries: &RetryConfig) -> ProxyEndpoint {
    proxy_endpoint_with_timeouts(origin, retries, TimeoutManager::default())
}

pub fn proxy_endpoint_with_timeouts(
    origin: Arc<dyn Origin>,
    retries: &RetryConfig,
    timeouts: TimeoutManager,
) -> ProxyEndpoint {
    let origins = Arc::new(OriginManager::new());
    origins.register(origin);
    ProxyEndpoint::new(
        origins,
        Arc::new(timeouts),
        RetryPolicy::from_config(retries),
        ErrorEndpoint::default(),
        Arc::new(NoopSink),
    )
}

/// A request routed to the scripted origin.
pub fn scripted_request(method: http::Method, path: &str, body: Body) -> HttpRequestMessage {
    let mut session = RequestSession::new();
    session.set_origin(SCRIPTED);
    HttpRequestMessage::new(session, method, path, Headers::new()).with_body(body)
}

/// A body delivered as separate chunks, as from a client socket.
pub fn streamed_body(chunks: &[&'static str], max_buffered: usize) -> Body {
    let chunks: Vec<_> = chunks
        .iter()
        .map(|c| Ok::<_, BodyError>(Bytes::from_static(c.as_bytes())))
        .collect();
    Body::from_stream(stream::iter(chunks).boxed(), max_buffered)
}

/// A body that sends `first` and then never finishes.
pub fn stalled_body(first: &'static str, max_buffered: usize) -> Body {
    let head = stream::iter(vec![Ok::<_, BodyError>(Bytes::from_static(first.as_bytes()))]);
    Body::from_stream(head.chain(stream::pending()).boxed(), max_buffered)
}

pub async fn read_body(response: HttpResponseMessage) -> Bytes {
    let (_, _, _, body) = response.into_parts();
    let mut out = Vec::new();
    let mut chunks = body.into_stream();
    while let Some(chunk) = chunks.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    Bytes::from(out)
}

/// One request as seen by a raw backend.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub head: String,
    pub body: Vec<u8>,
}

async fn read_request(socket: &mut TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some(SeenRequest { head, body })
}

/// Start a programmable raw HTTP/1.1 backend on an ephemeral port. `respond`
/// gets the 0-based request index and returns (status, extra headers, body).
pub async fn start_programmable_backend<F>(respond: F) -> (SocketAddr, Arc<Mutex<Vec<SeenRequest>>>)
where
    F: Fn(usize) -> (u16, Vec<(&'static str, String)>, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let respond = Arc::new(respond);

    let recorded = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = Arc::clone(&respond);
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let Some(request) = read_request(&mut socket).await else {
                    return;
                };
                let index = {
                    let mut seen = recorded.lock().unwrap();
                    seen.push(request);
                    seen.len() - 1
                };
                let (status, headers, body) = respond(index);
                let mut response = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Length: {}\r\nConnection: close\r\n",
                    body.len()
                );
                for (name, value) in headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(&body);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, seen)
}
