pub mod backend;
pub mod config;
pub mod fido;
pub mod ops;
pub mod pin;
pub mod proto;
pub mod session;
pub mod transport;
pub mod webauthn;

macro_rules! unwrap_field {
    ($field:expr) => {{
        if let Some(f) = $field {
            f
        } else {
            tracing::error!(
                "Device response did not contain expected field: {}",
                stringify!($field)
            );
            return Err($crate::webauthn::Error::Protocol(
                $crate::webauthn::ProtocolError::MissingField(stringify!($field)),
            ));
        }
    }};
}
pub(crate) use unwrap_field;

pub use backend::{select_backend, BackendPreference, CredentialBackend};
pub use config::SessionConfig;
pub use session::{Session, SessionHandle, SessionState, UiEvent};
pub use webauthn::{Error, ErrorKind};
