//! Inbound request message.

use std::fmt;

use http::Method;

use crate::context::RequestSession;
use crate::message::body::Body;
use crate::message::headers::Headers;
use crate::message::query::QueryParams;
use crate::passport::PassportState;

/// Immutable view of a request line and headers, used for snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    pub query: QueryParams,
    pub headers: Headers,
    pub protocol: String,
    pub scheme: String,
}

impl RequestInfo {
    pub fn path_and_query(&self) -> String {
        join_path_and_query(&self.path, &self.query)
    }
}

impl fmt::Display for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path_and_query())
    }
}

fn join_path_and_query(path: &str, query: &QueryParams) -> String {
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query.to_encoded())
    }
}

/// A client request flowing through the filter pipeline.
#[derive(Debug, Clone)]
pub struct HttpRequestMessage {
    session: RequestSession,
    method: Method,
    path: String,
    query: QueryParams,
    headers: Headers,
    protocol: String,
    scheme: String,
    body: Body,
    inbound: Option<Box<RequestInfo>>,
    body_chunks_recorded: usize,
}

impl HttpRequestMessage {
    /// `path` may include a query string.
    pub fn new(session: RequestSession, method: Method, path: &str, headers: Headers) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), QueryParams::parse(q)),
            None => (path.to_string(), QueryParams::new()),
        };
        Self {
            session,
            method,
            path,
            query,
            headers,
            protocol: "HTTP/1.1".to_string(),
            scheme: "http".to_string(),
            body: Body::empty(),
            inbound: None,
            body_chunks_recorded: 0,
        }
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn session(&self) -> &RequestSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut RequestSession {
        &mut self.session
    }

    pub fn into_session(self) -> RequestSession {
        self.session
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn query_mut(&mut self) -> &mut QueryParams {
        &mut self.query
    }

    pub fn path_and_query(&self) -> String {
        join_path_and_query(&self.path, &self.query)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = scheme.into();
    }

    /// Host header without port.
    pub fn host(&self) -> Option<&str> {
        let host = self.headers.get("host")?;
        match host.rsplit_once(':') {
            Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                Some(name)
            }
            _ => Some(host),
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn info(&self) -> RequestInfo {
        RequestInfo {
            method: self.method.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            headers: self.headers.clone(),
            protocol: self.protocol.clone(),
            scheme: self.scheme.clone(),
        }
    }

    /// Snapshot the request as received, before filters modify it.
    pub fn store_inbound_request(&mut self) {
        self.inbound = Some(Box::new(self.info()));
    }

    /// The request as received from the client, or the current state if no
    /// snapshot was stored.
    pub fn inbound_request(&self) -> RequestInfo {
        match &self.inbound {
            Some(info) => (**info).clone(),
            None => self.info(),
        }
    }

    /// Body is fully observed and can be resent unchanged.
    pub fn is_replayable(&self) -> bool {
        self.body.is_replayable()
    }

    /// Record passport states for body chunks observed since the last call.
    pub fn record_body_progress(&mut self) {
        let observed = self.body.buffered_chunk_count();
        let passport = self.session.passport_mut();
        for _ in self.body_chunks_recorded..observed {
            passport.add(PassportState::InReqContentReceived);
        }
        self.body_chunks_recorded = self.body_chunks_recorded.max(observed);
        if self.body.is_complete() {
            passport.add_if_not_already(PassportState::InReqLastContentReceived);
        }
    }
}

impl fmt::Display for HttpRequestMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path_and_query())
    }
}
