//! Per-request session state.
//!
//! # Responsibilities
//! - Typed key/value storage shared by filters of one request
//! - Pipeline flags (stop processing, send error response) and the terminal error
//! - Own the passport, the attempt ledger and the filter execution records
//! - Carry the cancellation handle checked by the proxy loop

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::attempts::RequestAttempts;
use crate::filters::FilterExecution;
use crate::message::Headers;
use crate::passport::Passport;
use crate::resilience::errors::ProxyError;

/// A value that can be stored in a session.
pub trait SessionValue: Any + Send + Sync + fmt::Debug {
    fn clone_box(&self) -> Box<dyn SessionValue>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T> SessionValue for T
where
    T: Any + Clone + Send + Sync + fmt::Debug,
{
    fn clone_box(&self) -> Box<dyn SessionValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

impl Clone for Box<dyn SessionValue> {
    fn clone(&self) -> Self {
        (**self).clone_box()
    }
}

/// Typed key for session values.
///
/// ```ignore
/// const TENANT: SessionKey<String> = SessionKey::new("tenant");
/// session.put(&TENANT, "acme".to_string());
/// ```
pub struct SessionKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SessionKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Shared cancellation flag for one request.
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A canned response set by a filter instead of proxying.
#[derive(Debug, Clone)]
pub struct StaticResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl StaticResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }
}

/// State for one logical client request.
#[derive(Debug, Clone)]
pub struct RequestSession {
    id: String,
    start: Instant,
    values: HashMap<&'static str, Box<dyn SessionValue>>,
    should_stop_filter_processing: bool,
    send_error_response: bool,
    error: Option<ProxyError>,
    passport: Passport,
    attempts: RequestAttempts,
    filter_executions: Vec<FilterExecution>,
    filter_priority_floor: i32,
    debug: bool,
    cancel: CancelHandle,
    route: Option<String>,
    origin: Option<String>,
    endpoint: Option<String>,
    static_response: Option<StaticResponse>,
    retry_budget: i32,
    read_timeout_override: Option<Duration>,
    origin_reported_duration: Option<Duration>,
    client_addr: Option<SocketAddr>,
}

impl Default for RequestSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestSession {
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start: Instant::now(),
            values: HashMap::new(),
            should_stop_filter_processing: false,
            send_error_response: false,
            error: None,
            passport: Passport::new(),
            attempts: RequestAttempts::new(),
            filter_executions: Vec::new(),
            filter_priority_floor: 0,
            debug: false,
            cancel: CancelHandle::new(),
            route: None,
            origin: None,
            endpoint: None,
            static_response: None,
            retry_budget: 0,
            read_timeout_override: None,
            origin_reported_duration: None,
            client_addr: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time since the request was accepted.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    // --- Typed values ---

    pub fn get<T: 'static>(&self, key: &SessionKey<T>) -> Option<&T> {
        self.values
            .get(key.name)
            .and_then(|v| (**v).as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: 'static>(&mut self, key: &SessionKey<T>) -> Option<&mut T> {
        self.values
            .get_mut(key.name)
            .and_then(|v| (**v).as_any_mut().downcast_mut::<T>())
    }

    pub fn put<T>(&mut self, key: &SessionKey<T>, value: T)
    where
        T: Any + Clone + Send + Sync + fmt::Debug,
    {
        self.values.insert(key.name, Box::new(value));
    }

    pub fn remove<T: 'static>(&mut self, key: &SessionKey<T>) -> Option<T> {
        let boxed = self.values.remove(key.name)?;
        boxed.into_any().downcast::<T>().ok().map(|b| *b)
    }

    pub fn contains<T>(&self, key: &SessionKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    // --- Pipeline flags ---

    pub fn should_stop_filter_processing(&self) -> bool {
        self.should_stop_filter_processing
    }

    /// Short-circuit the remaining filters of the current chain.
    pub fn stop_filter_processing(&mut self) {
        self.should_stop_filter_processing = true;
    }

    pub fn should_send_error_response(&self) -> bool {
        self.send_error_response
    }

    pub fn set_send_error_response(&mut self, value: bool) {
        self.send_error_response = value;
    }

    pub fn error(&self) -> Option<&ProxyError> {
        self.error.as_ref()
    }

    /// Record the terminal error; the processor routes to the error endpoint.
    pub fn set_error(&mut self, error: ProxyError) {
        self.error = Some(error);
    }

    pub fn take_error(&mut self) -> Option<ProxyError> {
        self.error.take()
    }

    pub fn filter_priority_floor(&self) -> i32 {
        self.filter_priority_floor
    }

    pub fn set_filter_priority_floor(&mut self, floor: i32) {
        self.filter_priority_floor = floor;
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    // --- Diagnostics ---

    pub fn passport(&self) -> &Passport {
        &self.passport
    }

    pub fn passport_mut(&mut self) -> &mut Passport {
        &mut self.passport
    }

    pub fn attempts(&self) -> &RequestAttempts {
        &self.attempts
    }

    pub fn attempts_mut(&mut self) -> &mut RequestAttempts {
        &mut self.attempts
    }

    pub fn filter_executions(&self) -> &[FilterExecution] {
        &self.filter_executions
    }

    pub fn record_filter_execution(&mut self, execution: FilterExecution) {
        self.filter_executions.push(execution);
    }

    // --- Cancellation ---

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // --- Routing ---

    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn set_route(&mut self, route: impl Into<String>) {
        self.route = Some(route.into());
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = Some(origin.into());
    }

    /// Endpoint to run; `None` means the default proxy endpoint.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        self.endpoint = Some(endpoint.into());
    }

    pub fn static_response(&self) -> Option<&StaticResponse> {
        self.static_response.as_ref()
    }

    pub fn set_static_response(&mut self, response: StaticResponse) {
        self.static_response = Some(response);
    }

    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    pub fn set_client_addr(&mut self, addr: SocketAddr) {
        self.client_addr = Some(addr);
    }

    // --- Retry / timeouts ---

    /// Remaining retries for this request. May go negative after an
    /// origin adjustment; any value <= 0 means no retries.
    pub fn retry_budget(&self) -> i32 {
        self.retry_budget
    }

    pub fn set_retry_budget(&mut self, budget: i32) {
        self.retry_budget = budget;
    }

    pub fn read_timeout_override(&self) -> Option<Duration> {
        self.read_timeout_override
    }

    pub fn set_read_timeout_override(&mut self, timeout: Duration) {
        self.read_timeout_override = Some(timeout);
    }

    pub fn origin_reported_duration(&self) -> Option<Duration> {
        self.origin_reported_duration
    }

    pub fn set_origin_reported_duration(&mut self, duration: Duration) {
        self.origin_reported_duration = Some(duration);
    }

    /// Total request time minus the origin-reported duration, in ms.
    /// Best-effort: clock skew between proxy and origin can make it negative.
    pub fn time_added_to_origin_ms(&self) -> Option<i64> {
        let reported = self.origin_reported_duration?;
        Some(self.elapsed().as_millis() as i64 - reported.as_millis() as i64)
    }
}
