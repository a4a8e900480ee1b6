//! JSON response models, following the WebAuthn Level 3 `toJSON()` serialization.
//!
//! See: https://www.w3.org/TR/webauthn-3/#sctn-public-key-credential-json

use serde::Serialize;

use super::Base64UrlString;
use crate::webauthn::error::{Error, PlatformError};

/// JSON output format options.
#[derive(Debug, Clone, Copy, Default)]
pub enum JsonFormat {
    #[default]
    Minified,
    Prettified,
}

/// What a response needs besides the authenticator's reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseContext {
    pub client_data_json: String,
    /// Transports of the authenticator that produced the response.
    pub transports: Vec<String>,
}

/// Converts an authenticator response into its JSON-serializable IDL model.
pub trait WebAuthnIDLResponse: Sized {
    type IdlModel: Serialize;

    fn to_idl_model(&self, ctx: &ResponseContext) -> Result<Self::IdlModel, Error>;

    fn to_json(&self, ctx: &ResponseContext, format: JsonFormat) -> Result<String, Error> {
        let model = self.to_idl_model(ctx)?;
        let json = match format {
            JsonFormat::Minified => serde_json::to_string(&model),
            JsonFormat::Prettified => serde_json::to_string_pretty(&model),
        };
        json.map_err(|err| Error::Platform(PlatformError::InvalidOptions(err.to_string())))
    }
}

/// dictionary RegistrationResponseJSON {
///     required DOMString id;
///     required Base64URLString rawId;
///     required AuthenticatorAttestationResponseJSON response;
///     DOMString authenticatorAttachment;
///     required AuthenticationExtensionsClientOutputsJSON clientExtensionResults;
///     required DOMString type;
/// };
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponseJSON {
    pub id: String,
    pub raw_id: Base64UrlString,
    pub response: AuthenticatorAttestationResponseJSON,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
    pub client_extension_results: AuthenticationExtensionsClientOutputsJSON,
    pub r#type: String,
}

/// dictionary AuthenticatorAttestationResponseJSON {
///     required Base64URLString clientDataJSON;
///     required Base64URLString authenticatorData;
///     required sequence<DOMString> transports;
///     Base64URLString publicKey;
///     required COSEAlgorithmIdentifier publicKeyAlgorithm;
///     required Base64URLString attestationObject;
/// };
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponseJSON {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlString,
    pub authenticator_data: Base64UrlString,
    pub transports: Vec<String>,
    /// SubjectPublicKeyInfo, absent for key types this crate cannot convert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Base64UrlString>,
    pub public_key_algorithm: i64,
    pub attestation_object: Base64UrlString,
}

/// dictionary AuthenticationResponseJSON {
///     required DOMString id;
///     required Base64URLString rawId;
///     required AuthenticatorAssertionResponseJSON response;
///     DOMString authenticatorAttachment;
///     required AuthenticationExtensionsClientOutputsJSON clientExtensionResults;
///     required DOMString type;
/// };
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponseJSON {
    pub id: String,
    pub raw_id: Base64UrlString,
    pub response: AuthenticatorAssertionResponseJSON,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
    pub client_extension_results: AuthenticationExtensionsClientOutputsJSON,
    pub r#type: String,
}

/// dictionary AuthenticatorAssertionResponseJSON {
///     required Base64URLString clientDataJSON;
///     required Base64URLString authenticatorData;
///     required Base64URLString signature;
///     Base64URLString userHandle;
/// };
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponseJSON {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlString,
    pub authenticator_data: Base64UrlString,
    pub signature: Base64UrlString,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Base64UrlString>,
}

/// Client extensions are not processed, so this is always an empty object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthenticationExtensionsClientOutputsJSON {}

pub(crate) const PUBLIC_KEY_TYPE: &str = "public-key";
pub(crate) const CROSS_PLATFORM: &str = "cross-platform";
