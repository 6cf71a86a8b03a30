//! Passport timeline and its text form.
//!
//! Text form (one line, offsets in milliseconds from creation):
//! ```text
//! CurrentPassport {start_ms=1700000000123, [+0=NEW, +2=FILTERS_INBOUND_START]}
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use super::state::{PassportState, UnknownState};

/// One recorded state and its offset from passport creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTime {
    pub state: PassportState,
    pub offset: Duration,
}

/// A matched start/end interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartAndEnd {
    pub start: Duration,
    pub end: Duration,
}

impl StartAndEnd {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PassportParseError {
    #[error("missing `CurrentPassport {{` prefix")]
    MissingPrefix,

    #[error("missing or invalid start_ms")]
    InvalidStart,

    #[error("malformed entry `{0}`")]
    MalformedEntry(String),

    #[error(transparent)]
    UnknownState(#[from] UnknownState),
}

/// Append-only, monotonically timestamped history of lifecycle states.
#[derive(Debug, Clone)]
pub struct Passport {
    start: Instant,
    creation_epoch_ms: u64,
    history: Vec<StateTime>,
    content_chunk_states: bool,
}

impl Default for Passport {
    fn default() -> Self {
        Self::new()
    }
}

impl Passport {
    pub fn new() -> Self {
        let creation_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            start: Instant::now(),
            creation_epoch_ms,
            history: Vec::new(),
            content_chunk_states: true,
        }
    }

    /// Toggle recording of per-chunk content states.
    pub fn with_content_chunk_states(mut self, enabled: bool) -> Self {
        self.content_chunk_states = enabled;
        self
    }

    pub fn set_content_chunk_states(&mut self, enabled: bool) {
        self.content_chunk_states = enabled;
    }

    /// Wall-clock creation time in milliseconds since the Unix epoch.
    pub fn creation_epoch_ms(&self) -> u64 {
        self.creation_epoch_ms
    }

    /// Time since the passport was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn add(&mut self, state: PassportState) {
        self.add_at(state, self.start.elapsed());
    }

    /// Record `state` at an explicit offset. Offsets earlier than the last
    /// entry are clamped so the history stays non-decreasing.
    pub fn add_at(&mut self, state: PassportState, offset: Duration) {
        if !self.content_chunk_states && state.is_content_chunk() {
            return;
        }
        let floor = self.history.last().map(|s| s.offset).unwrap_or_default();
        let offset = offset.max(floor);
        tracing::trace!(state = %state, offset_ms = offset.as_millis() as u64, "Passport state");
        self.history.push(StateTime { state, offset });
    }

    /// Record `state` only if it has never been recorded.
    pub fn add_if_not_already(&mut self, state: PassportState) {
        if self.find_state(state).is_none() {
            self.add(state);
        }
    }

    pub fn history(&self) -> &[StateTime] {
        &self.history
    }

    /// Most recently recorded state.
    pub fn get_state(&self) -> Option<PassportState> {
        self.history.last().map(|s| s.state)
    }

    /// First occurrence of `state`.
    pub fn find_state(&self, state: PassportState) -> Option<&StateTime> {
        self.history.iter().find(|s| s.state == state)
    }

    pub fn find_states(&self, state: PassportState) -> Vec<&StateTime> {
        self.history.iter().filter(|s| s.state == state).collect()
    }

    /// Last occurrence of `state`.
    pub fn find_backwards(&self, state: PassportState) -> Option<&StateTime> {
        self.history.iter().rev().find(|s| s.state == state)
    }

    /// Time from the first `start` to the last `end`; zero if either is missing.
    pub fn calculate_time_between(&self, start: PassportState, end: PassportState) -> Duration {
        match (self.find_state(start), self.find_backwards(end)) {
            (Some(s), Some(e)) => e.offset.saturating_sub(s.offset),
            _ => Duration::ZERO,
        }
    }

    /// Like `calculate_time_between`, but measures to now when `end` is absent.
    pub fn calculate_time_between_but_if_no_end_then_use_now(
        &self,
        start: PassportState,
        end: PassportState,
    ) -> Duration {
        let Some(s) = self.find_state(start) else {
            return Duration::ZERO;
        };
        let end_offset = self
            .find_backwards(end)
            .map(|e| e.offset)
            .unwrap_or_else(|| self.start.elapsed());
        end_offset.saturating_sub(s.offset)
    }

    /// Every `start` followed by an `end`, in order. A repeated `start`
    /// before an `end` restarts the open interval.
    pub fn find_each_pair_of(&self, start: PassportState, end: PassportState) -> Vec<StartAndEnd> {
        let mut pairs = Vec::new();
        let mut open: Option<Duration> = None;
        for entry in &self.history {
            if entry.state == start {
                open = Some(entry.offset);
            } else if entry.state == end {
                if let Some(s) = open.take() {
                    pairs.push(StartAndEnd {
                        start: s,
                        end: entry.offset,
                    });
                }
            }
        }
        pairs
    }
}

impl fmt::Display for Passport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CurrentPassport {{start_ms={}, [", self.creation_epoch_ms)?;
        for (i, entry) in self.history.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "+{}={}", entry.offset.as_millis(), entry.state)?;
        }
        f.write_str("]}")
    }
}

impl FromStr for Passport {
    type Err = PassportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix("CurrentPassport {")
            .and_then(|b| b.strip_suffix('}'))
            .ok_or(PassportParseError::MissingPrefix)?;

        let (start_part, rest) = body
            .split_once(", [")
            .ok_or(PassportParseError::InvalidStart)?;
        let creation_epoch_ms = start_part
            .strip_prefix("start_ms=")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(PassportParseError::InvalidStart)?;
        let entries = rest
            .strip_suffix(']')
            .ok_or_else(|| PassportParseError::MalformedEntry(rest.to_string()))?;

        let mut passport = Passport::new();
        passport.creation_epoch_ms = creation_epoch_ms;

        for token in entries.split(", ").filter(|t| !t.is_empty()) {
            let (offset, state) = token
                .strip_prefix('+')
                .and_then(|t| t.split_once('='))
                .ok_or_else(|| PassportParseError::MalformedEntry(token.to_string()))?;
            let offset_ms: u64 = offset
                .parse()
                .map_err(|_| PassportParseError::MalformedEntry(token.to_string()))?;
            let state: PassportState = state.parse()?;
            passport.history.push(StateTime {
                state,
                offset: Duration::from_millis(offset_ms),
            });
        }

        Ok(passport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PassportState::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn sample() -> Passport {
        let mut p = Passport::new();
        p.add_at(New, ms(0));
        p.add_at(OriginConnAcquireStart, ms(3));
        p.add_at(OriginConnAcquireEnd, ms(5));
        p.add_at(OriginRetryStart, ms(20));
        p.add_at(OriginConnAcquireStart, ms(21));
        p.add_at(OriginConnAcquireEnd, ms(26));
        p
    }

    #[test]
    fn test_time_between_missing_state_is_zero() {
        let p = sample();
        assert_eq!(p.calculate_time_between(New, OutRespLastContentSent), Duration::ZERO);
        assert_eq!(p.calculate_time_between(InReqCancelled, New), Duration::ZERO);
        assert_eq!(p.calculate_time_between(New, OriginConnAcquireEnd), ms(26));
    }

    #[test]
    fn test_time_between_uses_now_when_end_missing() {
        let mut p = Passport::new();
        p.add_at(New, ms(0));
        std::thread::sleep(ms(5));
        let elapsed = p.calculate_time_between_but_if_no_end_then_use_now(New, OutRespLastContentSent);
        assert!(elapsed >= ms(5));
        assert_eq!(
            p.calculate_time_between_but_if_no_end_then_use_now(InReqCancelled, New),
            Duration::ZERO
        );
    }

    #[test]
    fn test_find_each_pair_across_retries() {
        let p = sample();
        let pairs = p.find_each_pair_of(OriginConnAcquireStart, OriginConnAcquireEnd);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].duration(), ms(2));
        assert_eq!(pairs[1], StartAndEnd { start: ms(21), end: ms(26) });
    }

    #[test]
    fn test_add_if_not_already_and_lookups() {
        let mut p = sample();
        p.add_if_not_already(New);
        p.add_if_not_already(InRespHeadersReceived);
        assert_eq!(p.find_states(New).len(), 1);
        assert_eq!(p.get_state(), Some(InRespHeadersReceived));
        assert_eq!(p.find_state(OriginConnAcquireStart).unwrap().offset, ms(3));
        assert_eq!(p.find_backwards(OriginConnAcquireStart).unwrap().offset, ms(21));
    }

    #[test]
    fn test_offsets_never_decrease() {
        let mut p = Passport::new();
        p.add_at(New, ms(10));
        p.add_at(FiltersInboundStart, ms(4));
        assert_eq!(p.history()[1].offset, ms(10));
    }

    #[test]
    fn test_content_chunk_suppression() {
        let mut p = Passport::new().with_content_chunk_states(false);
        p.add(InReqContentReceived);
        p.add(InReqLastContentReceived);
        assert_eq!(p.history().len(), 1);
        assert_eq!(p.get_state(), Some(InReqLastContentReceived));
    }

    #[test]
    fn test_text_form_parses_back() {
        let p = sample();
        let text = p.to_string();
        assert!(text.starts_with("CurrentPassport {start_ms="));
        assert!(text.ends_with("+21=ORIGIN_CONN_ACQUIRE_START, +26=ORIGIN_CONN_ACQUIRE_END]}"));

        let parsed: Passport = text.parse().unwrap();
        assert_eq!(parsed.creation_epoch_ms(), p.creation_epoch_ms());
        assert_eq!(parsed.history(), p.history());
        assert_eq!(parsed.to_string(), text);
    }

    #[test]
    fn test_parse_empty_and_invalid() {
        let empty: Passport = "CurrentPassport {start_ms=42, []}".parse().unwrap();
        assert!(empty.history().is_empty());
        assert_eq!(empty.creation_epoch_ms(), 42);

        assert!(matches!(
            "Passport {}".parse::<Passport>(),
            Err(PassportParseError::MissingPrefix)
        ));
        assert!(matches!(
            "CurrentPassport {start_ms=1, [+x=NEW]}".parse::<Passport>(),
            Err(PassportParseError::MalformedEntry(_))
        ));
        assert!(matches!(
            "CurrentPassport {start_ms=1, [+3=NOPE]}".parse::<Passport>(),
            Err(PassportParseError::UnknownState(_))
        ));
    }
}
