pub mod bio_enrollment;
pub mod error;
pub mod negotiator;

pub use crate::transport::error::TransportError;
pub use error::{CtapError, Error, ErrorKind, PlatformError, ProtocolError};
pub use negotiator::{NegotiatorState, PinProtocolState, PinUvNegotiator, UsedPinUvAuthToken};
