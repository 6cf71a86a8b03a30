//! Error response rendering.
//!
//! Every terminal failure becomes a concrete status with a small JSON body:
//! `{"code":"READ_TIMEOUT","message":"...","status":504}` plus an
//! `x-edge-error` header carrying the error type.

use futures_util::future::BoxFuture;
use serde::Serialize;

use crate::context::RequestSession;
use crate::filters::Endpoint;
use crate::message::{Headers, HttpRequestMessage, HttpResponseMessage, RequestInfo};
use crate::passport::PassportState;
use crate::resilience::errors::{ErrorStatusMap, ErrorType, ProxyError};

pub const ERROR_HEADER: &str = "x-edge-error";

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
    status: u16,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorEndpoint {
    statuses: ErrorStatusMap,
}

impl ErrorEndpoint {
    pub const NAME: &'static str = "error";

    pub fn new(statuses: ErrorStatusMap) -> Self {
        Self { statuses }
    }

    pub fn status_for(&self, error_type: ErrorType) -> u16 {
        self.statuses.status_for(error_type)
    }

    /// Build the error response for the session's error (or a generic
    /// rejection if a filter asked for an error response without one).
    pub fn render(&self, mut session: RequestSession, request: RequestInfo) -> HttpResponseMessage {
        let error = session
            .error()
            .cloned()
            .unwrap_or_else(|| ProxyError::new(ErrorType::Other, "request rejected"));
        let status = self.status_for(error.error_type());

        tracing::warn!(
            request_id = %session.id(),
            error_type = %error.error_type(),
            status,
            error = %error,
            "Sending error response"
        );
        session
            .passport_mut()
            .add(PassportState::ErrorResponseGenerated);

        let body = serde_json::to_vec(&ErrorBody {
            code: error.error_type().as_str(),
            message: error.message(),
            status,
        })
        .unwrap_or_default();

        let mut headers = Headers::new();
        headers.add("Content-Type", "application/json");
        headers.add(ERROR_HEADER, error.error_type().as_str());

        HttpResponseMessage::new(session, request, status)
            .with_headers(headers)
            .with_body(bytes::Bytes::from(body))
    }

    /// Replace a response with the error response for its session.
    pub fn rewrite(&self, response: HttpResponseMessage) -> HttpResponseMessage {
        let request = response.request().clone();
        let (session, _, _, _) = response.into_parts();
        self.render(session, request)
    }
}

impl Endpoint for ErrorEndpoint {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(&self, request: HttpRequestMessage) -> BoxFuture<'_, HttpResponseMessage> {
        let info = request.info();
        let response = self.render(request.into_session(), info);
        Box::pin(async move { response })
    }
}
