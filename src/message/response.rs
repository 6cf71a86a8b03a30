//! Response message returned through the outbound filters.

use std::fmt;

use crate::context::RequestSession;
use crate::message::body::Body;
use crate::message::headers::Headers;
use crate::message::request::RequestInfo;

#[derive(Debug, Clone)]
pub struct HttpResponseMessage {
    session: RequestSession,
    request: RequestInfo,
    status: u16,
    headers: Headers,
    body: Body,
}

impl HttpResponseMessage {
    /// `request` is the request this response answers.
    pub fn new(session: RequestSession, request: RequestInfo, status: u16) -> Self {
        Self {
            session,
            request,
            status,
            headers: Headers::new(),
            body: Body::empty(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    pub fn session(&self) -> &RequestSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut RequestSession {
        &mut self.session
    }

    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn into_parts(self) -> (RequestSession, u16, Headers, Body) {
        (self.session, self.status, self.headers, self.body)
    }
}

impl fmt::Display for HttpResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.status, self.request)
    }
}
