use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::transport::TransportKind;
use crate::webauthn::error::{Error, PlatformError};

/// Which [`CredentialBackend`](crate::backend::CredentialBackend) to run operations on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// The platform authenticator when one is available, CTAP2 otherwise.
    #[default]
    Auto,
    Ctap2,
    Platform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounds commands that wait for the user, unless the request carries its own timeout.
    pub operation_timeout_ms: u64,
    /// Bounds GetInfo and the other commands that answer right away.
    pub get_info_timeout_ms: u64,
    pub event_capacity: usize,
    pub transports: Vec<TransportKind>,
    /// PIN/UV auth protocols, most preferred first.
    pub pin_uv_auth_protocols: Vec<u32>,
    pub backend: BackendPreference,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 60_000,
            get_info_timeout_ms: 1_000,
            event_capacity: 16,
            transports: TransportKind::all(),
            pin_uv_auth_protocols: vec![2, 1],
            backend: BackendPreference::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|err| {
            warn!(%err, "Invalid session configuration");
            Error::Platform(PlatformError::InvalidOptions(err.to_string()))
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn get_info_timeout(&self) -> Duration {
        Duration::from_millis(self.get_info_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        let config = SessionConfig::from_json("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.operation_timeout(), Duration::from_secs(60));
        assert_eq!(config.get_info_timeout(), Duration::from_secs(1));
        assert_eq!(config.pin_uv_auth_protocols, vec![2, 1]);
        assert_eq!(config.transports.len(), 3);
        assert_eq!(config.backend, BackendPreference::Auto);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = SessionConfig::from_json(
            r#"{"operation_timeout_ms": 5000, "transports": ["usb"], "backend": "ctap2"}"#,
        )
        .unwrap();
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.transports, vec![TransportKind::Usb]);
        assert_eq!(config.backend, BackendPreference::Ctap2);
        assert_eq!(config.event_capacity, 16);
    }

    #[test]
    fn malformed_document_is_rejected() {
        assert!(matches!(
            SessionConfig::from_json(r#"{"transports": ["serial"]}"#),
            Err(Error::Platform(PlatformError::InvalidOptions(_)))
        ));
        assert!(SessionConfig::from_json("[").is_err());
    }
}
