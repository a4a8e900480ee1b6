mod base64url;
pub mod create;
pub mod get;
mod response;
pub mod rpid;

pub use base64url::Base64UrlString;
pub use response::{
    AuthenticationExtensionsClientOutputsJSON, AuthenticationResponseJSON,
    AuthenticatorAssertionResponseJSON, AuthenticatorAttestationResponseJSON, JsonFormat,
    RegistrationResponseJSON, ResponseContext, WebAuthnIDLResponse,
};
pub(crate) use response::{CROSS_PLATFORM, PUBLIC_KEY_TYPE};

use serde::de::DeserializeOwned;
use tracing::warn;

use crate::ops::webauthn::Origin;
use crate::webauthn::error::{Error, PlatformError};

/// A request that can be built from its WebAuthn JSON options, for a given origin.
pub trait WebAuthnIDL: Sized {
    /// The JSON model that this IDL can deserialize from.
    type InnerModel: DeserializeOwned;

    fn from_inner_model(origin: &Origin, inner: Self::InnerModel) -> Result<Self, Error>;

    fn from_json(origin: &Origin, json: &str) -> Result<Self, Error> {
        let inner_model: Self::InnerModel = serde_json::from_str(json).map_err(|err| {
            warn!(%err, "Invalid WebAuthn options JSON");
            Error::Platform(PlatformError::InvalidOptions(err.to_string()))
        })?;
        Self::from_inner_model(origin, inner_model)
    }
}
