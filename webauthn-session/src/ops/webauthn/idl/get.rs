use serde::Deserialize;
use serde_bytes::ByteBuf;

use crate::{
    ops::webauthn::{Base64UrlString, UserVerificationRequirement},
    proto::ctap2::{Ctap2PublicKeyCredentialDescriptor, Ctap2PublicKeyCredentialType},
};

// https://www.w3.org/TR/webauthn-3/#sctn-parseRequestOptionsFromJSON

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialRequestOptionsJSON {
    pub challenge: Base64UrlString,
    /// Milliseconds.
    pub timeout: Option<u32>,
    #[serde(rename = "rpId")]
    pub relying_party_id: Option<String>,
    #[serde(default)]
    pub allow_credentials: Vec<PublicKeyCredentialDescriptorJSON>,
    #[serde(rename = "userVerification", default)]
    pub uv_requirement: UserVerificationRequirement,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PublicKeyCredentialDescriptorJSON {
    pub id: Base64UrlString,
    pub r#type: Ctap2PublicKeyCredentialType,
    pub transports: Option<Vec<String>>,
}

impl From<PublicKeyCredentialDescriptorJSON> for Ctap2PublicKeyCredentialDescriptor {
    fn from(descriptor: PublicKeyCredentialDescriptorJSON) -> Self {
        Ctap2PublicKeyCredentialDescriptor {
            r#type: descriptor.r#type,
            id: ByteBuf::from(descriptor.id.0),
            transports: descriptor.transports,
        }
    }
}
