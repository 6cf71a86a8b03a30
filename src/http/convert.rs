//! Conversions between axum's request/response types and pipeline messages.
//!
//! # Responsibilities
//! - Turn an inbound axum request into an `HttpRequestMessage` with a streamed body
//! - Turn the final `HttpResponseMessage` into an axum response without buffering
//!
//! # Design Decisions
//! - Requests whose body is already at end of stream get an empty, complete
//!   body so they are replayable from the start
//! - Out-of-range statuses become 502 rather than panicking

use axum::body::{Body as AxumBody, HttpBody};
use axum::http::{HeaderMap, Request, Response, StatusCode, Version};
use futures_util::StreamExt;

use crate::context::RequestSession;
use crate::message::{Body, BodyError, Headers, HttpRequestMessage, HttpResponseMessage};

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<usize>().ok())
}

pub fn to_request_message(
    request: Request<AxumBody>,
    session: RequestSession,
    max_buffered: usize,
) -> HttpRequestMessage {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let body = if body.is_end_stream() {
        Body::empty()
    } else {
        let declared = if parts.headers.contains_key(http::header::TRANSFER_ENCODING) {
            None
        } else {
            body.size_hint()
                .exact()
                .and_then(|len| usize::try_from(len).ok())
                .or_else(|| content_length(&parts.headers))
        };
        let stream = body
            .into_data_stream()
            .map(|chunk| chunk.map_err(|e| BodyError::Read(e.to_string())))
            .boxed();
        let body = Body::from_stream(stream, max_buffered);
        match declared {
            Some(len) => body.with_expected_len(len),
            None => body,
        }
    };

    let mut message = HttpRequestMessage::new(
        session,
        parts.method,
        path_and_query,
        Headers::from(&parts.headers),
    )
    .with_protocol(protocol_name(parts.version))
    .with_body(body);
    if let Some(scheme) = parts.uri.scheme_str() {
        message.set_scheme(scheme);
    }
    message
}

pub fn into_axum_response(response: HttpResponseMessage) -> Response<AxumBody> {
    let (_, status, headers, body) = response.into_parts();
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut out = Response::new(AxumBody::from_stream(body.into_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers.to_header_map();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[tokio::test]
    async fn test_request_conversion() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/orders?id=7")
            .header("Host", "api.example.com")
            .header("Content-Length", "11")
            .body(AxumBody::from("Hello There"))
            .unwrap();
        let mut message = to_request_message(request, RequestSession::new(), 1024);

        assert_eq!(message.method(), Method::POST);
        assert_eq!(message.path(), "/orders");
        assert_eq!(message.query().get("id"), Some("7"));
        assert_eq!(message.host(), Some("api.example.com"));
        assert!(!message.is_replayable());

        message.body_mut().buffer_remaining().await.unwrap();
        assert_eq!(message.body().bytes().unwrap().as_ref(), b"Hello There");
        assert!(message.is_replayable());
    }

    #[tokio::test]
    async fn test_body_without_framing_headers_is_kept() {
        let request = Request::builder()
            .method(Method::POST)
            .version(Version::HTTP_2)
            .uri("/upload")
            .body(AxumBody::from("Hello There"))
            .unwrap();
        let mut message = to_request_message(request, RequestSession::new(), 1024);
        assert_eq!(message.protocol(), "HTTP/2.0");
        assert!(!message.is_replayable());

        message.body_mut().buffer_remaining().await.unwrap();
        assert_eq!(message.body().bytes().unwrap().as_ref(), b"Hello There");
    }

    #[test]
    fn test_bodyless_request_is_replayable() {
        let request = Request::builder().uri("/").body(AxumBody::empty()).unwrap();
        let message = to_request_message(request, RequestSession::new(), 1024);
        assert!(message.is_replayable());
    }

    #[tokio::test]
    async fn test_response_conversion() {
        let info = HttpRequestMessage::new(RequestSession::new(), Method::GET, "/", Headers::new()).info();
        let mut headers = Headers::new();
        headers.add("X-Origin", "a");
        let response = HttpResponseMessage::new(RequestSession::new(), info, 201)
            .with_headers(headers)
            .with_body("done");

        let out = into_axum_response(response);
        assert_eq!(out.status(), StatusCode::CREATED);
        assert_eq!(out.headers()["x-origin"], "a");
        let bytes = axum::body::to_bytes(out.into_body(), 1024).await.unwrap();
        assert_eq!(bytes.as_ref(), b"done");
    }
}
