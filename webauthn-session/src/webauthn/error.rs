use serde::ser::{Serialize, SerializeStruct, Serializer};

pub use crate::proto::CtapError;
use crate::{proto::ctap2::cbor::CborError, transport::error::TransportError};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Device unavailable")]
    DeviceUnavailable,
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Ctap error: {0}")]
    Ctap(#[from] CtapError),
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("Cancelled")]
    Cancelled,
}

impl From<CborError> for Error {
    fn from(error: CborError) -> Self {
        Error::Protocol(ProtocolError::Cbor(error))
    }
}

/// Malformed or unexpected data coming from the authenticator.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ProtocolError {
    #[error("cbor serialization error: {0}")]
    Cbor(#[from] CborError),
    #[error("response is missing required field {0}")]
    MissingField(&'static str),
    #[error("empty response frame")]
    EmptyFrame,
    #[error("invalid authenticator data: {0}")]
    InvalidAuthenticatorData(String),
    #[error("invalid key agreement key")]
    InvalidKeyAgreement,
    #[error("unsupported credential public key")]
    UnsupportedPublicKey,
    #[error("enrollment finished with a bad sample")]
    UnexpectedEnrollmentStatus,
    #[error("implausible number of matching credentials: {0}")]
    InvalidCredentialsCount(u32),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum PlatformError {
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),
    #[error("relying party id {0} is not valid for this origin")]
    RelyingPartyMismatch(String),
    #[error("invalid request options: {0}")]
    InvalidOptions(String),
    #[error("PIN does not satisfy the PIN policy: {0}")]
    PinPolicy(&'static str),
    #[error("no user verification mechanism available")]
    NoUvAvailable,
    #[error("operation not supported")]
    NotSupported,
    #[error("session was already used")]
    SessionAlreadyUsed,
    #[error("crypto failure")]
    Crypto,
}

/// Error classification reported with terminal session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceUnavailable,
    Transport,
    Protocol,
    AuthenticatorStatus(CtapError),
    Platform,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceUnavailable => "deviceUnavailable",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::AuthenticatorStatus(_) => "authenticatorStatus",
            ErrorKind::Platform => "platform",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceUnavailable => ErrorKind::DeviceUnavailable,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::Ctap(status) => ErrorKind::AuthenticatorStatus(*status),
            Error::Platform(_) => ErrorKind::Platform,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Raw authenticator status byte, if this error came from one.
    pub fn status_code(&self) -> Option<u8> {
        match self {
            Error::Ctap(status) => Some(status.code()),
            _ => None,
        }
    }
}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Error", 3)?;
        state.serialize_field("kind", self.kind().as_str())?;
        state.serialize_field("statusCode", &self.status_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
