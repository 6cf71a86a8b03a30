//! Route lookup and the inbound routing filter.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up matching route for request
//! - Tag the session with the matched route and origin
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Explicit no-match becomes ORIGIN_NOT_FOUND rather than a silent default

use crate::config::schema::RouteConfig;
use crate::filters::{FilterError, FilterInfo, SyncFilter};
use crate::message::HttpRequestMessage;
use crate::resilience::errors::{ErrorType, ProxyError};
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};

#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub origin: String,
    pub priority: u32,
    matcher: AndMatcher,
}

impl Route {
    pub fn from_config(config: &RouteConfig) -> Self {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
        if let Some(host) = &config.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }
        if let Some(prefix) = &config.path_prefix {
            matchers.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
        }
        Self {
            name: config.name.clone(),
            origin: config.origin.clone(),
            priority: config.priority,
            matcher: AndMatcher::new(matchers),
        }
    }

    pub fn matches(&self, req: &HttpRequestMessage) -> bool {
        self.matcher.matches(req)
    }
}

/// Compiled routes, highest priority first.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(configs: &[RouteConfig]) -> Self {
        let mut routes: Vec<Route> = configs.iter().map(Route::from_config).collect();
        // Stable: equal priorities keep config order.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self { routes }
    }

    pub fn find(&self, req: &HttpRequestMessage) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(req))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Inbound filter selecting the origin for each request.
pub struct RoutingFilter {
    info: FilterInfo,
    table: RouteTable,
}

impl RoutingFilter {
    pub const NAME: &'static str = "routing";

    pub fn new(table: RouteTable) -> Self {
        Self {
            info: FilterInfo::inbound(Self::NAME, 0).abort_on_error(),
            table,
        }
    }
}

impl SyncFilter<HttpRequestMessage> for RoutingFilter {
    fn info(&self) -> &FilterInfo {
        &self.info
    }

    /// Requests already routed (or answered) by an earlier filter are left alone.
    fn should_filter(&self, req: &HttpRequestMessage) -> bool {
        let session = req.session();
        session.origin().is_none() && session.static_response().is_none()
    }

    fn apply_sync(&self, req: &mut HttpRequestMessage) -> Result<(), FilterError> {
        let Some(route) = self.table.find(req) else {
            tracing::debug!(
                request_id = %req.session().id(),
                host = ?req.host(),
                path = %req.path(),
                "No route matched"
            );
            return Err(ProxyError::new(
                ErrorType::OriginNotFound,
                format!("no route for {} {}", req.method(), req.path()),
            )
            .into());
        };

        tracing::trace!(
            request_id = %req.session().id(),
            route = %route.name,
            origin = %route.origin,
            "Route matched"
        );
        let (name, origin) = (route.name.clone(), route.origin.clone());
        let session = req.session_mut();
        session.set_route(name);
        session.set_origin(origin);
        Ok(())
    }
}
