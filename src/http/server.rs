//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Assemble the pipeline from config (origins, filters, endpoints)
//! - Create Axum Router with one catch-all handler
//! - Wire up middleware (request ID, tracing)
//! - Hand each request to the `FilterProcessor` and stream the result back
//! - Cancel in-flight work when the client goes away
//! - Run active health checks and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response, StatusCode},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::schema::{LoadSheddingConfig, ProxyConfig};
use crate::context::{CancelHandle, RequestSession};
use crate::filters::{
    DebugRequestFilter, DebugResponseFilter, Filter, FilterProcessor, Synchronous,
};
use crate::health::HealthMonitor;
use crate::http::convert::{into_axum_response, to_request_message};
use crate::lifecycle::Shutdown;
use crate::load_balancer::backend::Backend;
use crate::message::{HttpRequestMessage, HttpResponseMessage};
use crate::net::ConnectionTracker;
use crate::observability::{MetricsSink, NoopSink, PrometheusSink};
use crate::origin::{HttpOrigin, OriginManager};
use crate::passport::PassportState;
use crate::proxy::{ErrorEndpoint, ProxyEndpoint};
use crate::resilience::errors::ErrorStatusMap;
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::TimeoutManager;
use crate::routing::{RouteTable, RoutingFilter};
use crate::security::headers::ProxyHeaderFilter;

pub const X_REQUEST_ID: &str = "x-request-id";

/// How long shutdown waits for in-flight requests.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    processor: Arc<FilterProcessor>,
    tracker: ConnectionTracker,
    load_shedding: LoadSheddingConfig,
    content_chunk_states: bool,
    max_buffered: usize,
}

/// HTTP server for the edge proxy.
pub struct HttpServer {
    router: Router,
    tracker: ConnectionTracker,
    health: Option<HealthMonitor>,
}

impl HttpServer {
    /// Build the full pipeline described by `config`.
    pub fn new(config: &ProxyConfig) -> Self {
        let metrics: Arc<dyn MetricsSink> = if config.observability.metrics_enabled {
            Arc::new(PrometheusSink)
        } else {
            Arc::new(NoopSink)
        };
        let (processor, backends) = build_processor(config, metrics);

        let mut server = Self::with_processor(config, processor);
        if config.health_check.enabled {
            server.health = Some(HealthMonitor::new(backends, config.health_check.clone()));
        }
        server
    }

    /// Serve an already assembled processor.
    pub fn with_processor(config: &ProxyConfig, processor: FilterProcessor) -> Self {
        let tracker = ConnectionTracker::new();
        let state = AppState {
            processor: Arc::new(processor),
            tracker: tracker.clone(),
            load_shedding: config.load_shedding.clone(),
            content_chunk_states: config.passport.content_chunk_states,
            max_buffered: config.body.max_buffered_bytes,
        };

        Self {
            router: Self::build_router(state),
            tracker,
            health: None,
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if let Some(monitor) = self.health {
            let rx = shutdown.subscribe();
            tokio::spawn(monitor.run(rx));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let signal = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { signal.wait().await })
            .await?;

        if !self.tracker.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::warn!(
                in_flight = self.tracker.active_count(),
                "Shutdown deadline reached with requests in flight"
            );
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Assemble origins, filters and endpoints. Also returns every origin server
/// for the health monitor.
pub fn build_processor(
    config: &ProxyConfig,
    metrics: Arc<dyn MetricsSink>,
) -> (FilterProcessor, Vec<Arc<Backend>>) {
    let timeouts = Arc::new(TimeoutManager::from_config(&config.timeouts, &config.origins));
    let origins = Arc::new(OriginManager::new());
    let mut backends = Vec::new();
    for origin_config in &config.origins {
        let origin = HttpOrigin::from_config(
            origin_config,
            &config.retries,
            &config.health_check,
            timeouts.connect_timeout(&origin_config.name),
        );
        backends.extend(origin.backends().iter().cloned());
        origins.register(Arc::new(origin));
    }

    let statuses = ErrorStatusMap::new(config.errors.status_overrides.clone());
    let proxy = ProxyEndpoint::new(
        origins,
        timeouts,
        RetryPolicy::from_config(&config.retries),
        ErrorEndpoint::new(statuses.clone()),
        metrics.clone(),
    );

    let mut builder = FilterProcessor::builder()
        .config(config.filters.clone())
        .error_statuses(statuses)
        .metrics(metrics)
        .endpoint(Arc::new(proxy));

    if config.debug.enabled {
        let debug_request: Arc<dyn Filter<HttpRequestMessage>> =
            Arc::new(Synchronous(DebugRequestFilter::new(&config.debug)));
        let debug_response: Arc<dyn Filter<HttpResponseMessage>> =
            Arc::new(Synchronous(DebugResponseFilter::new()));
        builder = builder.inbound(debug_request).outbound(debug_response);
    }
    let headers: Arc<dyn Filter<HttpRequestMessage>> =
        Arc::new(Synchronous(ProxyHeaderFilter::new(&config.headers)));
    let routing: Arc<dyn Filter<HttpRequestMessage>> =
        Arc::new(Synchronous(RoutingFilter::new(RouteTable::new(&config.routes))));

    (builder.inbound(headers).inbound(routing).build(), backends)
}

/// Cancels the request if the handler future is dropped before completion.
struct CancelOnDrop {
    handle: CancelHandle,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.handle.cancel();
        }
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let guard = state.tracker.track();

    let mut session = match request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
    {
        Some(id) => RequestSession::with_id(id),
        None => RequestSession::new(),
    };
    session.set_client_addr(peer);
    session
        .passport_mut()
        .set_content_chunk_states(state.content_chunk_states);
    session.passport_mut().add(PassportState::InReqHeadersReceived);
    if let Some(floor) = state.tracker.shedding_floor(&state.load_shedding) {
        tracing::debug!(request_id = %session.id(), floor, "Shedding low-priority filters");
        session.set_filter_priority_floor(floor);
    }

    let request_id = session.id().to_string();
    tracing::debug!(
        request_id = %request_id,
        seq = %guard.seq(),
        method = %request.method(),
        uri = %request.uri(),
        "Processing request"
    );

    let mut cancel = CancelOnDrop {
        handle: session.cancel_handle().clone(),
        armed: true,
    };
    let message = to_request_message(request, session, state.max_buffered);
    let processor = Arc::clone(&state.processor);
    let task = tokio::spawn(async move {
        let _guard = guard;
        processor.process(message).await
    });

    let result = task.await;
    cancel.armed = false;

    match result {
        Ok(mut response) => {
            response
                .session_mut()
                .passport_mut()
                .add(PassportState::OutRespHeadersSending);
            into_axum_response(response)
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Request task failed");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
