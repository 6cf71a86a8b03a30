//! RequestAttempt / RequestAttempts.

use std::time::Duration;

use serde::Serialize;

use crate::load_balancer::backend::ServerInfo;
use crate::resilience::errors::ProxyError;

/// What happened on one origin-connection attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAttempt {
    /// 1-based, assigned by `RequestAttempts::push`.
    pub attempt: u32,
    /// Origin status, -1 until a response is received.
    pub status: i32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub origin: String,
    pub read_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_retries: i32,
}

impl RequestAttempt {
    pub fn new(
        origin: impl Into<String>,
        server: Option<&ServerInfo>,
        read_timeout: Duration,
        connect_timeout: Duration,
        max_retries: i32,
    ) -> Self {
        let mut attempt = Self {
            status: -1,
            origin: origin.into(),
            read_timeout_ms: read_timeout.as_millis() as u64,
            connect_timeout_ms: connect_timeout.as_millis() as u64,
            max_retries,
            ..Default::default()
        };
        if let Some(server) = server {
            attempt.set_server(server);
        }
        attempt
    }

    pub fn set_server(&mut self, server: &ServerInfo) {
        self.host = Some(server.host.clone());
        self.port = Some(server.port);
        self.zone = server.zone.clone();
        self.region = server.region.clone();
        self.app = server.app.clone();
        self.instance_id = Some(server.instance_id());
    }

    pub fn complete(&mut self, status: u16, duration: Duration) {
        self.status = i32::from(status);
        self.duration_ms = duration.as_millis() as u64;
    }

    pub fn set_error(&mut self, error: &ProxyError, duration: Duration) {
        self.error = Some(error.to_string());
        self.error_type = Some(error.error_type().as_str().to_string());
        self.exception_type = Some(error.exception_type());
        self.duration_ms = duration.as_millis() as u64;
    }
}

/// Ordered ledger of attempts for one logical request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RequestAttempts {
    attempts: Vec<RequestAttempt>,
}

impl RequestAttempts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `attempt`, numbering it after the current last record.
    /// Returns the assigned number.
    pub fn push(&mut self, mut attempt: RequestAttempt) -> u32 {
        let number = self.attempts.len() as u32 + 1;
        attempt.attempt = number;
        self.attempts.push(attempt);
        number
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestAttempt> {
        self.attempts.iter()
    }

    pub fn get(&self, number: u32) -> Option<&RequestAttempt> {
        number
            .checked_sub(1)
            .and_then(|i| self.attempts.get(i as usize))
    }

    /// The attempt that determined the outcome.
    pub fn final_attempt(&self) -> Option<&RequestAttempt> {
        self.attempts.last()
    }

    pub fn final_attempt_mut(&mut self) -> Option<&mut RequestAttempt> {
        self.attempts.last_mut()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string())
    }
}
