mod client_data;
mod get_assertion;
pub mod idl;
mod make_credential;

pub use client_data::{ClientData, Origin};
pub use get_assertion::{Assertion, GetAssertionRequest};
pub use idl::{
    create::PublicKeyCredentialCreationOptionsJSON, get::PublicKeyCredentialRequestOptionsJSON,
    rpid::RelyingPartyId, AuthenticationExtensionsClientOutputsJSON, AuthenticationResponseJSON,
    AuthenticatorAssertionResponseJSON, AuthenticatorAttestationResponseJSON, Base64UrlString,
    JsonFormat, RegistrationResponseJSON, ResponseContext, WebAuthnIDL, WebAuthnIDLResponse,
};
pub use make_credential::{MakeCredentialRequest, MakeCredentialResponse, ResidentKeyRequirement};

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum Operation {
    MakeCredential,
    GetAssertion,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    Discouraged,
    #[default]
    #[serde(other)]
    Preferred,
}

impl UserVerificationRequirement {
    /// Check if user verification is discouraged
    pub fn is_discouraged(&self) -> bool {
        match self {
            Self::Required | Self::Preferred => false,
            Self::Discouraged => true,
        }
    }

    /// Check if user verification is preferred or required for this request
    pub fn is_preferred(&self) -> bool {
        match self {
            Self::Required | Self::Preferred => true,
            Self::Discouraged => false,
        }
    }

    /// Check if user verification is strictly required for this request
    pub fn is_required(&self) -> bool {
        match self {
            Self::Required => true,
            Self::Preferred | Self::Discouraged => false,
        }
    }
}
