//! Lifecycle states recorded in a passport.

use std::fmt;
use std::str::FromStr;

macro_rules! passport_states {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A named point in a request's lifecycle.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PassportState {
            $($variant),+
        }

        impl PassportState {
            pub const ALL: &'static [PassportState] = &[$(PassportState::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(PassportState::$variant => $name),+
                }
            }
        }

        impl FromStr for PassportState {
            type Err = UnknownState;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(PassportState::$variant),)+
                    other => Err(UnknownState(other.to_string())),
                }
            }
        }
    };
}

passport_states! {
    New => "NEW",
    InReqHeadersReceived => "IN_REQ_HEADERS_RECEIVED",
    InReqContentReceived => "IN_REQ_CONTENT_RECEIVED",
    InReqLastContentReceived => "IN_REQ_LAST_CONTENT_RECEIVED",
    InReqCancelled => "IN_REQ_CANCELLED",
    FiltersInboundStart => "FILTERS_INBOUND_START",
    FiltersInboundEnd => "FILTERS_INBOUND_END",
    FiltersEndpointStart => "FILTERS_ENDPOINT_START",
    FiltersEndpointEnd => "FILTERS_ENDPOINT_END",
    FiltersOutboundStart => "FILTERS_OUTBOUND_START",
    FiltersOutboundEnd => "FILTERS_OUTBOUND_END",
    OriginConnAcquireStart => "ORIGIN_CONN_ACQUIRE_START",
    OriginConnAcquireEnd => "ORIGIN_CONN_ACQUIRE_END",
    OriginConnAcquireFailed => "ORIGIN_CONN_ACQUIRE_FAILED",
    OriginRetryStart => "ORIGIN_RETRY_START",
    OutReqHeadersSending => "OUT_REQ_HEADERS_SENDING",
    OutReqHeadersSent => "OUT_REQ_HEADERS_SENT",
    OutReqContentSent => "OUT_REQ_CONTENT_SENT",
    OutReqLastContentSent => "OUT_REQ_LAST_CONTENT_SENT",
    InRespHeadersReceived => "IN_RESP_HEADERS_RECEIVED",
    InRespContentReceived => "IN_RESP_CONTENT_RECEIVED",
    InRespLastContentReceived => "IN_RESP_LAST_CONTENT_RECEIVED",
    OriginChReadTimeout => "ORIGIN_CH_READ_TIMEOUT",
    OriginChIoEx => "ORIGIN_CH_IO_EX",
    OriginConnReleased => "ORIGIN_CONN_RELEASED",
    OriginConnBroken => "ORIGIN_CONN_BROKEN",
    OutRespHeadersSending => "OUT_RESP_HEADERS_SENDING",
    OutRespHeadersSent => "OUT_RESP_HEADERS_SENT",
    OutRespContentSent => "OUT_RESP_CONTENT_SENT",
    OutRespLastContentSent => "OUT_RESP_LAST_CONTENT_SENT",
    ErrorResponseGenerated => "ERROR_RESPONSE_GENERATED",
    Now => "NOW",
}

impl PassportState {
    /// High-volume per-chunk states that `[passport] content_chunk_states` can suppress.
    pub fn is_content_chunk(&self) -> bool {
        matches!(
            self,
            PassportState::InReqContentReceived
                | PassportState::OutReqContentSent
                | PassportState::InRespContentReceived
                | PassportState::OutRespContentSent
        )
    }
}

impl fmt::Display for PassportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unrecognised state name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown passport state: {0}")]
pub struct UnknownState(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for state in PassportState::ALL {
            assert_eq!(state.as_str().parse::<PassportState>().unwrap(), *state);
        }
        assert!("BOGUS".parse::<PassportState>().is_err());
    }

    #[test]
    fn test_content_chunk_states() {
        assert!(PassportState::InReqContentReceived.is_content_chunk());
        assert!(!PassportState::InReqLastContentReceived.is_content_chunk());
        assert!(!PassportState::OriginRetryStart.is_content_chunk());
    }
}
