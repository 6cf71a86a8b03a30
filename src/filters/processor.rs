//! Drives a request through inbound filters, an endpoint and outbound filters.
//!
//! # Responsibilities
//! - Own the inbound/outbound chains and the registered endpoints
//! - Pick the endpoint: error endpoint, static response, or the named endpoint
//! - Convert fatal outbound failures into an error response

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::schema::FilterConfig;
use crate::context::StaticResponse;
use crate::filters::chain::{ChainOutcome, FilterChain};
use crate::filters::filter::{
    Endpoint, ExecutionStatus, Filter, FilterExecution, FilterType,
};
use crate::message::{HttpRequestMessage, HttpResponseMessage};
use crate::observability::{MetricsSink, NoopSink};
use crate::passport::PassportState;
use crate::proxy::error_endpoint::ErrorEndpoint;
use crate::resilience::concurrency::ConcurrencyLimiter;
use crate::resilience::errors::{ErrorStatusMap, ErrorType, ProxyError};

/// Name of the endpoint used when no filter picks one.
pub const DEFAULT_ENDPOINT: &str = "proxy";

struct EndpointEntry {
    endpoint: Arc<dyn Endpoint>,
    limiter: Arc<ConcurrencyLimiter>,
}

pub struct FilterProcessor {
    inbound: FilterChain<HttpRequestMessage>,
    outbound: FilterChain<HttpResponseMessage>,
    endpoints: HashMap<String, EndpointEntry>,
    default_endpoint: String,
    error_endpoint: ErrorEndpoint,
    metrics: Arc<dyn MetricsSink>,
}

impl FilterProcessor {
    pub fn builder() -> FilterProcessorBuilder {
        FilterProcessorBuilder::default()
    }

    /// Run the inbound chain.
    pub async fn run_inbound(&self, request: &mut HttpRequestMessage) -> ChainOutcome {
        self.inbound.run(request).await
    }

    /// Run the outbound chain; a fatal failure turns the response into an error response.
    pub async fn run_outbound(&self, mut response: HttpResponseMessage) -> HttpResponseMessage {
        let outcome = self.outbound.run(&mut response).await;
        if outcome.failed() {
            return self.error_endpoint.rewrite(response);
        }
        response
    }

    /// Produce the response for a request.
    pub async fn run_endpoint(&self, mut request: HttpRequestMessage) -> HttpResponseMessage {
        request
            .session_mut()
            .passport_mut()
            .add(PassportState::FiltersEndpointStart);
        let started = Instant::now();

        let session = request.session();
        let (name, mut response) = if session.error().is_some() || session.should_send_error_response() {
            let name = ErrorEndpoint::NAME.to_string();
            (name, self.error_endpoint.apply(request).await)
        } else if let Some(static_response) = session.static_response().cloned() {
            ("static".to_string(), static_reply(request, static_response))
        } else {
            let name = session.endpoint().unwrap_or(self.default_endpoint.as_str()).to_string();
            let response = self.dispatch(&name, request).await;
            (name, response)
        };

        let elapsed = started.elapsed();
        self.metrics
            .filter_executed(&name, FilterType::Endpoint, ExecutionStatus::Success, elapsed);
        let session = response.session_mut();
        session.record_filter_execution(FilterExecution {
            name,
            filter_type: FilterType::Endpoint,
            status: ExecutionStatus::Success,
            duration: elapsed,
            error: None,
        });
        session.passport_mut().add(PassportState::FiltersEndpointEnd);
        response
    }

    async fn dispatch(&self, name: &str, mut request: HttpRequestMessage) -> HttpResponseMessage {
        let Some(entry) = self.endpoints.get(name) else {
            request.session_mut().set_error(ProxyError::new(
                ErrorType::Other,
                format!("no endpoint named {name}"),
            ));
            return self.error_endpoint.apply(request).await;
        };

        let Some(_permit) = entry.limiter.try_acquire() else {
            tracing::warn!(
                request_id = %request.session().id(),
                endpoint = %name,
                limit = entry.limiter.limit(),
                "Endpoint concurrency limit exceeded"
            );
            request.session_mut().set_error(ProxyError::new(
                ErrorType::FilterConcurrencyExceeded,
                format!("endpoint {name} exceeded its concurrency limit"),
            ));
            return self.error_endpoint.apply(request).await;
        };

        entry.endpoint.apply(request).await
    }

    /// Inbound filters → endpoint → outbound filters.
    pub async fn process(&self, mut request: HttpRequestMessage) -> HttpResponseMessage {
        let inbound = self.run_inbound(&mut request).await;
        if inbound.is_aborted() {
            tracing::debug!(
                request_id = %request.session().id(),
                cause = ?inbound.cause,
                "Inbound chain aborted"
            );
        }
        let response = self.run_endpoint(request).await;
        self.run_outbound(response).await
    }

    pub fn inbound_filters(&self) -> Vec<&str> {
        self.inbound.names()
    }

    pub fn outbound_filters(&self) -> Vec<&str> {
        self.outbound.names()
    }

    pub fn error_endpoint(&self) -> &ErrorEndpoint {
        &self.error_endpoint
    }
}

fn static_reply(request: HttpRequestMessage, reply: StaticResponse) -> HttpResponseMessage {
    let info = request.info();
    HttpResponseMessage::new(request.into_session(), info, reply.status)
        .with_headers(reply.headers)
        .with_body(reply.body)
}

#[derive(Default)]
pub struct FilterProcessorBuilder {
    config: FilterConfig,
    inbound: Vec<Arc<dyn Filter<HttpRequestMessage>>>,
    outbound: Vec<Arc<dyn Filter<HttpResponseMessage>>>,
    endpoints: Vec<Arc<dyn Endpoint>>,
    default_endpoint: Option<String>,
    error_statuses: ErrorStatusMap,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl FilterProcessorBuilder {
    pub fn config(mut self, config: FilterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn inbound(mut self, filter: Arc<dyn Filter<HttpRequestMessage>>) -> Self {
        self.inbound.push(filter);
        self
    }

    pub fn outbound(mut self, filter: Arc<dyn Filter<HttpResponseMessage>>) -> Self {
        self.outbound.push(filter);
        self
    }

    pub fn endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn default_endpoint(mut self, name: impl Into<String>) -> Self {
        self.default_endpoint = Some(name.into());
        self
    }

    pub fn error_statuses(mut self, statuses: ErrorStatusMap) -> Self {
        self.error_statuses = statuses;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> FilterProcessor {
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NoopSink));
        let endpoints = self
            .endpoints
            .into_iter()
            .map(|endpoint| {
                let name = endpoint.name().to_string();
                let limit = self.config.concurrency_limit_for(&name, FilterType::Endpoint);
                let entry = EndpointEntry {
                    limiter: ConcurrencyLimiter::new(name.clone(), limit),
                    endpoint,
                };
                (name, entry)
            })
            .collect();

        FilterProcessor {
            inbound: FilterChain::new(FilterType::Inbound, self.inbound, &self.config, metrics.clone()),
            outbound: FilterChain::new(FilterType::Outbound, self.outbound, &self.config, metrics.clone()),
            endpoints,
            default_endpoint: self
                .default_endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            error_endpoint: ErrorEndpoint::new(self.error_statuses),
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestSession;
    use crate::filters::filter::{FilterError, FilterInfo, FnFilter, Synchronous};
    use crate::message::Headers;
    use futures_util::future::BoxFuture;

    struct Echo;

    impl Endpoint for Echo {
        fn name(&self) -> &str {
            "proxy"
        }

        fn apply(&self, request: HttpRequestMessage) -> BoxFuture<'_, HttpResponseMessage> {
            Box::pin(async move {
                let info = request.info();
                let body = request.body().clone();
                HttpResponseMessage::new(request.into_session(), info, 200).with_body(body)
            })
        }
    }

    fn request() -> HttpRequestMessage {
        HttpRequestMessage::new(RequestSession::new(), http::Method::GET, "/", Headers::new())
            .with_body("ping")
    }

    #[tokio::test]
    async fn test_default_endpoint_runs() {
        let processor = FilterProcessor::builder().endpoint(Arc::new(Echo)).build();
        let response = processor.process(request()).await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.body().bytes().unwrap().as_ref(), b"ping");

        let passport = response.session().passport();
        let order: Vec<_> = passport.history().iter().map(|s| s.state).collect();
        assert_eq!(
            order,
            vec![
                PassportState::FiltersInboundStart,
                PassportState::FiltersInboundEnd,
                PassportState::FiltersEndpointStart,
                PassportState::FiltersEndpointEnd,
                PassportState::FiltersOutboundStart,
                PassportState::FiltersOutboundEnd,
            ]
        );
    }

    #[tokio::test]
    async fn test_static_response_short_circuits() {
        let filter: Arc<dyn Filter<HttpRequestMessage>> = Arc::new(Synchronous(FnFilter::new(
            FilterInfo::inbound("healthcheck", 0),
            |req: &mut HttpRequestMessage| -> Result<(), FilterError> {
                req.session_mut()
                    .set_static_response(StaticResponse::new(204, ""));
                req.session_mut().stop_filter_processing();
                Ok(())
            },
        )));
        let processor = FilterProcessor::builder()
            .inbound(filter)
            .endpoint(Arc::new(Echo))
            .build();

        let response = processor.process(request()).await;
        assert_eq!(response.status(), 204);
    }

    #[tokio::test]
    async fn test_abort_routes_to_error_endpoint() {
        let filter: Arc<dyn Filter<HttpRequestMessage>> = Arc::new(Synchronous(FnFilter::new(
            FilterInfo::inbound("auth", 0).abort_on_error(),
            |_: &mut HttpRequestMessage| -> Result<(), FilterError> {
                Err(ProxyError::new(ErrorType::OriginNotFound, "no route").into())
            },
        )));
        let processor = FilterProcessor::builder()
            .inbound(filter)
            .endpoint(Arc::new(Echo))
            .build();

        let response = processor.process(request()).await;
        assert_eq!(response.status(), 404);
        assert_eq!(response.headers().get("x-edge-error"), Some("ORIGIN_NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_outbound_abort_becomes_error_response() {
        let filter: Arc<dyn Filter<HttpResponseMessage>> = Arc::new(Synchronous(FnFilter::new(
            FilterInfo::outbound("validate", 0).abort_on_error(),
            |_: &mut HttpResponseMessage| -> Result<(), FilterError> {
                Err(FilterError::failed("bad response"))
            },
        )));
        let processor = FilterProcessor::builder()
            .outbound(filter)
            .endpoint(Arc::new(Echo))
            .build();

        let response = processor.process(request()).await;
        assert_eq!(response.status(), 500);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_is_error() {
        let processor = FilterProcessor::builder().default_endpoint("missing").build();
        let response = processor.process(request()).await;
        assert_eq!(response.status(), 500);
    }
}
