//! Server-wide configuration.

use std::time::Duration;

use chargewire_session::{SessionConfig, SessionError};

/// What to do when a charge point connects under an identity that already
/// has a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateIdentityPolicy {
    /// Keep both. [`ServerHandle::get_session`](crate::ServerHandle::get_session)
    /// returns the newest.
    #[default]
    Coexist,
    /// Refuse the new upgrade with HTTP 409.
    RejectNew,
    /// Close the existing sessions with code 4000, then accept.
    ReplaceExisting,
}

/// Configuration for an [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Sub-protocols in order of server preference, e.g. `ocpp2.0.1`
    /// before `ocpp1.6`.
    pub protocols: Vec<String>,
    /// Applied to every session the server creates.
    pub session: SessionConfig,
    /// How long the authenticator may take to decide. `None` waits
    /// indefinitely.
    pub handshake_timeout: Option<Duration>,
    /// How long a client may take to send its upgrade request head.
    pub request_timeout: Duration,
    pub duplicate_identity: DuplicateIdentityPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocols: Vec::new(),
            session: SessionConfig::default(),
            handshake_timeout: None,
            request_timeout: Duration::from_secs(10),
            duplicate_identity: DuplicateIdentityPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Rejects out-of-range values, including those of the session config.
    pub fn validate(&self) -> Result<(), SessionError> {
        self.session.validate()?;
        if self.protocols.iter().any(|p| p.trim().is_empty()) {
            return Err(SessionError::Configuration(
                "protocol names must not be empty".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(SessionError::Configuration(
                "request_timeout must be non-zero".into(),
            ));
        }
        if self.handshake_timeout.is_some_and(|d| d.is_zero()) {
            return Err(SessionError::Configuration(
                "handshake_timeout must be non-zero (use None to wait indefinitely)"
                    .into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_protocol_returns_error() {
        let config = ServerConfig {
            protocols: vec!["ocpp1.6".into(), " ".into()],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SessionError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_checks_session_config() {
        let config = ServerConfig {
            session: SessionConfig {
                call_concurrency: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
