//! Per-request debug mode.
//!
//! A request carrying the debug header (default `x-edge-debug: true`) gets its
//! attempt ledger, passport and filter executions echoed back as response headers.

use crate::config::schema::DebugConfig;
use crate::filters::filter::{FilterError, FilterInfo, SyncFilter};
use crate::message::{HttpRequestMessage, HttpResponseMessage};

pub const ATTEMPTS_HEADER: &str = "x-edge-attempts";
pub const PASSPORT_HEADER: &str = "x-edge-passport";
pub const FILTERS_HEADER: &str = "x-edge-filters";

/// Turns on debug mode for requests that ask for it.
pub struct DebugRequestFilter {
    info: FilterInfo,
    header: String,
}

impl DebugRequestFilter {
    pub const NAME: &'static str = "debug_request";

    pub fn new(config: &DebugConfig) -> Self {
        Self {
            info: FilterInfo::inbound(Self::NAME, -1000),
            header: config.header.clone(),
        }
    }
}

impl SyncFilter<HttpRequestMessage> for DebugRequestFilter {
    fn info(&self) -> &FilterInfo {
        &self.info
    }

    fn should_filter(&self, request: &HttpRequestMessage) -> bool {
        request.headers().contains_value(&self.header, "true")
    }

    fn apply_sync(&self, request: &mut HttpRequestMessage) -> Result<(), FilterError> {
        request.session_mut().set_debug(true);
        Ok(())
    }
}

/// Attaches diagnostics to responses of debug-mode requests.
pub struct DebugResponseFilter {
    info: FilterInfo,
}

impl DebugResponseFilter {
    pub const NAME: &'static str = "debug_response";

    pub fn new() -> Self {
        Self {
            info: FilterInfo::outbound(Self::NAME, i32::MAX).overrides_stop_processing(),
        }
    }
}

impl Default for DebugResponseFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncFilter<HttpResponseMessage> for DebugResponseFilter {
    fn info(&self) -> &FilterInfo {
        &self.info
    }

    fn should_filter(&self, response: &HttpResponseMessage) -> bool {
        response.session().debug()
    }

    fn apply_sync(&self, response: &mut HttpResponseMessage) -> Result<(), FilterError> {
        let session = response.session();
        let attempts = session.attempts().to_json();
        let passport = session.passport().to_string();
        let filters = session
            .filter_executions()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let headers = response.headers_mut();
        headers.set(ATTEMPTS_HEADER, attempts);
        headers.set(PASSPORT_HEADER, passport);
        headers.set(FILTERS_HEADER, filters);
        Ok(())
    }
}
