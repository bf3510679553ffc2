//! Per-session configuration.

use std::time::Duration;

use crate::SessionError;

/// How outbound correlation ids are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallIdStrategy {
    /// `"1"`, `"2"`, `"3"`, ... per session.
    #[default]
    Sequential,
    /// 128 random bits as 32 lowercase hex characters.
    Random,
}

/// Configuration for session behavior.
///
/// Sensible defaults are provided; create one with
/// `SessionConfig::default()` and override the fields you care about.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long an outbound call waits for its answer once it is on the
    /// wire. Default: 30 seconds.
    pub call_timeout: Duration,

    /// Interval between WebSocket pings. `None` disables keepalive.
    /// Default: 30 seconds.
    pub ping_interval: Option<Duration>,

    /// How long to wait for the pong. Falls back to `ping_interval`.
    pub pong_timeout: Option<Duration>,

    /// Postpone the next ping whenever a frame is sent or received.
    pub defer_pings_on_activity: bool,

    /// Maximum outbound calls awaiting an answer at once. Must be at
    /// least 1. OCPP-J expects 1. Default: 1.
    pub call_concurrency: usize,

    /// Consecutive malformed frames tolerated before the session is closed
    /// with code 1002. `None` tolerates any number.
    pub max_bad_messages: Option<u32>,

    /// Validate payloads with the session's
    /// [`PayloadValidator`](crate::PayloadValidator).
    pub strict_mode: bool,

    /// Include the panic message in the details of the `InternalError`
    /// sent when a handler panics.
    pub respond_with_detailed_errors: bool,

    /// How long a graceful close waits for the peer's close frame.
    /// Default: 5 seconds.
    pub close_timeout: Duration,

    pub call_ids: CallIdStrategy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            ping_interval: Some(Duration::from_secs(30)),
            pong_timeout: None,
            defer_pings_on_activity: false,
            call_concurrency: 1,
            max_bad_messages: None,
            strict_mode: false,
            respond_with_detailed_errors: false,
            close_timeout: Duration::from_secs(5),
            call_ids: CallIdStrategy::Sequential,
        }
    }
}

impl SessionConfig {
    /// Rejects out-of-range values.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.call_concurrency == 0 {
            return Err(SessionError::Configuration(
                "call_concurrency must be at least 1".into(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(SessionError::Configuration(
                "call_timeout must be non-zero".into(),
            ));
        }
        if self.close_timeout.is_zero() {
            return Err(SessionError::Configuration(
                "close_timeout must be non-zero".into(),
            ));
        }
        if self.ping_interval.is_some_and(|d| d.is_zero()) {
            return Err(SessionError::Configuration(
                "ping_interval must be non-zero (use None to disable)".into(),
            ));
        }
        if self.pong_timeout.is_some_and(|d| d.is_zero()) {
            return Err(SessionError::Configuration(
                "pong_timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// The pong deadline actually in force, if keepalive is enabled.
    pub fn effective_pong_timeout(&self) -> Option<Duration> {
        self.ping_interval.map(|interval| self.pong_timeout.unwrap_or(interval))
    }
}
