//! Full filter pipeline: inbound chain, proxy endpoint, outbound chain.

mod common;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use http::Method;
use tokio::sync::Notify;

use common::*;
use edge_proxy::config::schema::{DebugConfig, FilterConfig, RetryConfig, RouteConfig};
use edge_proxy::context::{RequestSession, StaticResponse};
use edge_proxy::filters::debug::{ATTEMPTS_HEADER, FILTERS_HEADER, PASSPORT_HEADER};
use edge_proxy::filters::{
    DebugRequestFilter, DebugResponseFilter, ExecutionStatus, Filter, FilterError, FilterInfo,
    FilterProcessor, FilterType, FnFilter, SyncFilter, Synchronous,
};
use edge_proxy::message::{Body, Headers, HttpRequestMessage};
use edge_proxy::passport::{Passport, PassportState};
use edge_proxy::proxy::ERROR_HEADER;
use edge_proxy::routing::{RouteTable, RoutingFilter};

fn tagging(name: &str, order: i32) -> Arc<dyn Filter<HttpRequestMessage>> {
    let tag = name.to_string();
    Arc::new(Synchronous(FnFilter::new(
        FilterInfo::inbound(name, order),
        move |req: &mut HttpRequestMessage| -> Result<(), FilterError> {
            req.headers_mut().add("x-order", tag.clone());
            Ok(())
        },
    )))
}

fn routing() -> Arc<dyn Filter<HttpRequestMessage>> {
    let routes = [RouteConfig {
        name: "api".to_string(),
        host: None,
        path_prefix: Some("/api".to_string()),
        origin: SCRIPTED.to_string(),
        priority: 0,
    }];
    Arc::new(Synchronous(RoutingFilter::new(RouteTable::new(&routes))))
}

fn debug_request() -> Arc<dyn Filter<HttpRequestMessage>> {
    Arc::new(Synchronous(DebugRequestFilter::new(&DebugConfig::default())))
}

fn processor_with(
    origin: Arc<ScriptedOrigin>,
    config: FilterConfig,
    inbound: Vec<Arc<dyn Filter<HttpRequestMessage>>>,
) -> FilterProcessor {
    let mut builder = FilterProcessor::builder()
        .config(config)
        .endpoint(Arc::new(proxy_endpoint(origin, &RetryConfig::default())))
        .outbound(Arc::new(Synchronous(DebugResponseFilter::new())));
    for filter in inbound {
        builder = builder.inbound(filter);
    }
    builder.build()
}

fn request(path: &str, headers: Headers) -> HttpRequestMessage {
    HttpRequestMessage::new(RequestSession::new(), Method::GET, path, headers)
}

fn executions(session: &RequestSession, filter_type: FilterType) -> Vec<(String, ExecutionStatus)> {
    session
        .filter_executions()
        .iter()
        .filter(|e| e.filter_type == filter_type)
        .map(|e| (e.name.clone(), e.status))
        .collect()
}

#[tokio::test]
async fn test_filters_run_in_ascending_order() {
    let origin = Arc::new(ScriptedOrigin::new(0, vec![Step::Status(200)]));
    let processor = processor_with(
        origin,
        FilterConfig::default(),
        vec![tagging("five", 5), tagging("one", 1), routing(), tagging("ten", 10)],
    );

    let response = processor.process(request("/api/users", Headers::new())).await;

    assert_eq!(response.status(), 200);
    let names: Vec<_> = executions(response.session(), FilterType::Inbound)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names, vec!["routing", "one", "five", "ten"]);
    assert_eq!(
        response.request().headers.get_all("x-order"),
        vec!["one", "five", "ten"]
    );
}

struct NeverApplies {
    info: FilterInfo,
    applied: AtomicU32,
}

impl SyncFilter<HttpRequestMessage> for NeverApplies {
    fn info(&self) -> &FilterInfo {
        &self.info
    }

    fn should_filter(&self, _req: &HttpRequestMessage) -> bool {
        false
    }

    fn apply_sync(&self, _req: &mut HttpRequestMessage) -> Result<(), FilterError> {
        self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_inapplicable_filter_is_skipped() {
    let never = Arc::new(Synchronous(NeverApplies {
        info: FilterInfo::inbound("never", 3),
        applied: AtomicU32::new(0),
    }));
    let origin = Arc::new(ScriptedOrigin::new(0, vec![Step::Status(200)]));
    let filters = vec![routing(), never.clone() as Arc<dyn Filter<HttpRequestMessage>>];
    let processor = processor_with(origin, FilterConfig::default(), filters);

    let response = processor.process(request("/api", Headers::new())).await;

    assert_eq!(response.status(), 200);
    assert_eq!(never.0.applied.load(Ordering::SeqCst), 0);
    assert!(executions(response.session(), FilterType::Inbound)
        .contains(&("never".to_string(), ExecutionStatus::Skipped)));
}

#[tokio::test]
async fn test_priority_floor_disables_low_priority_filters() {
    let origin = Arc::new(ScriptedOrigin::new(0, vec![Step::Status(200)]));
    let important: Arc<dyn Filter<HttpRequestMessage>> = Arc::new(Synchronous(FnFilter::new(
        FilterInfo::inbound("important", 1).with_priority(50),
        |req: &mut HttpRequestMessage| -> Result<(), FilterError> {
            req.headers_mut().set("x-important", "yes");
            Ok(())
        },
    )));
    let routing_high: Arc<dyn Filter<HttpRequestMessage>> = {
        let routes = [RouteConfig {
            name: "api".to_string(),
            host: None,
            path_prefix: None,
            origin: SCRIPTED.to_string(),
            priority: 0,
        }];
        Arc::new(Synchronous(RoutingFilter::new(RouteTable::new(&routes))))
    };
    let processor = processor_with(
        origin,
        FilterConfig::default(),
        vec![routing_high, important, tagging("optional", 2)],
    );

    let mut req = request("/", Headers::new());
    req.session_mut().set_filter_priority_floor(10);
    let response = processor.process(req).await;

    let inbound = executions(response.session(), FilterType::Inbound);
    assert!(inbound.contains(&("important".to_string(), ExecutionStatus::Success)));
    assert!(inbound.contains(&("optional".to_string(), ExecutionStatus::Disabled)));
    // routing has priority 0 as well, so nothing picked an origin
    assert!(inbound.contains(&("routing".to_string(), ExecutionStatus::Disabled)));
    assert_eq!(response.status(), 404);
}

/// Holds every caller until released.
struct Gate {
    info: FilterInfo,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    calls: AtomicU32,
}

impl Filter<HttpRequestMessage> for Gate {
    fn info(&self) -> &FilterInfo {
        &self.info
    }

    fn apply<'a>(&'a self, _req: &'a mut HttpRequestMessage) -> BoxFuture<'a, Result<(), FilterError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_concurrency_ceiling_rejects_without_invoking_filter() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gate = Arc::new(Gate {
        info: FilterInfo::inbound("gate", 1),
        entered: entered.clone(),
        release: release.clone(),
        calls: AtomicU32::new(0),
    });
    let config = FilterConfig {
        concurrency_limits: HashMap::from([("gate".to_string(), 1)]),
        ..FilterConfig::default()
    };
    let origin = Arc::new(ScriptedOrigin::new(0, vec![Step::Status(200), Step::Status(200)]));
    let filters = vec![routing(), gate.clone() as Arc<dyn Filter<HttpRequestMessage>>];
    let processor = Arc::new(processor_with(origin, config, filters));

    let first = tokio::spawn({
        let processor = processor.clone();
        async move { processor.process(request("/api/a", Headers::new())).await }
    });
    entered.notified().await;

    let rejected = processor.process(request("/api/b", Headers::new())).await;
    assert_eq!(rejected.status(), 503);
    assert_eq!(rejected.headers().get(ERROR_HEADER), Some("FILTER_CONCURRENCY_EXCEEDED"));
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    assert!(executions(rejected.session(), FilterType::Inbound)
        .contains(&("gate".to_string(), ExecutionStatus::Failed)));

    release.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_debug_mode_exposes_attempts_passport_and_filters() {
    let origin = Arc::new(ScriptedOrigin::new(1, vec![Step::Status(503), Step::Status(200)]));
    let processor = processor_with(
        origin,
        FilterConfig::default(),
        vec![debug_request(), routing()],
    );

    let headers: Headers = [("x-edge-debug", "true")].into_iter().collect();
    let response = processor.process(request("/api/orders", headers)).await;

    assert_eq!(response.status(), 200);
    let attempts: serde_json::Value =
        serde_json::from_str(response.headers().get(ATTEMPTS_HEADER).unwrap()).unwrap();
    let attempts = attempts.as_array().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0]["status"], 503);
    assert_eq!(attempts[1]["status"], 200);
    assert_eq!(attempts[1]["host"], "10.0.0.2");

    let passport = Passport::from_str(response.headers().get(PASSPORT_HEADER).unwrap()).unwrap();
    assert_eq!(passport.find_states(PassportState::OriginRetryStart).len(), 1);
    assert!(passport.find_state(PassportState::FiltersEndpointEnd).is_some());

    let filters = response.headers().get(FILTERS_HEADER).unwrap();
    assert!(filters.contains("debug_request[SUCCESS]"), "{filters}");
    assert!(filters.contains("routing[SUCCESS]"), "{filters}");
    assert!(filters.contains("proxy[SUCCESS]"), "{filters}");
}

#[tokio::test]
async fn test_debug_headers_absent_without_debug_header() {
    let origin = Arc::new(ScriptedOrigin::new(0, vec![Step::Status(200)]));
    let processor = processor_with(
        origin,
        FilterConfig::default(),
        vec![debug_request(), routing()],
    );

    let response = processor.process(request("/api", Headers::new())).await;

    assert!(response.headers().get(ATTEMPTS_HEADER).is_none());
    assert!(executions(response.session(), FilterType::Outbound)
        .contains(&("debug_response".to_string(), ExecutionStatus::Skipped)));
}

#[tokio::test]
async fn test_stop_processing_serves_static_response() {
    let origin = Arc::new(ScriptedOrigin::new(0, vec![Step::Status(200)]));
    let stopper: Arc<dyn Filter<HttpRequestMessage>> = Arc::new(Synchronous(FnFilter::new(
        FilterInfo::inbound("maintenance", -10),
        |req: &mut HttpRequestMessage| -> Result<(), FilterError> {
            let session = req.session_mut();
            session.set_static_response(StaticResponse::new(503, "down for maintenance"));
            session.stop_filter_processing();
            Ok(())
        },
    )));
    let processor = processor_with(origin.clone(), FilterConfig::default(), vec![stopper, routing()]);

    let response = processor.process(request("/api", Headers::new())).await;

    assert_eq!(response.status(), 503);
    assert!(origin.bodies().is_empty());
    assert_eq!(origin.request_ends.load(Ordering::SeqCst), 0);
    let inbound = executions(response.session(), FilterType::Inbound);
    assert_eq!(inbound, vec![("maintenance".to_string(), ExecutionStatus::Success)]);
    assert_eq!(read_body(response).await, "down for maintenance");
}

#[tokio::test]
async fn test_unrouted_request_gets_not_found() {
    let origin = Arc::new(ScriptedOrigin::new(0, vec![Step::Status(200)]));
    let processor = processor_with(origin.clone(), FilterConfig::default(), vec![routing()]);

    let response = processor.process(request("/elsewhere", Headers::new())).await;

    assert_eq!(response.status(), 404);
    assert_eq!(response.headers().get(ERROR_HEADER), Some("ORIGIN_NOT_FOUND"));
    assert!(origin.bodies().is_empty());
    let endpoint = executions(response.session(), FilterType::Endpoint);
    assert_eq!(endpoint, vec![("error".to_string(), ExecutionStatus::Success)]);
}

#[tokio::test]
async fn test_post_body_survives_pipeline_retry() {
    let origin = Arc::new(ScriptedOrigin::new(1, vec![Step::Status(503), Step::Status(200)]));
    let processor = processor_with(origin.clone(), FilterConfig::default(), vec![routing()]);

    let req = HttpRequestMessage::new(RequestSession::new(), Method::POST, "/api/orders", Headers::new())
        .with_body(Body::from("Hello There"));
    let response = processor.process(req).await;

    assert_eq!(response.status(), 200);
    assert_eq!(origin.bodies(), vec!["Hello There", "Hello There"]);
}
