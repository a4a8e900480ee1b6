use serde::Deserialize;

use super::{get::PublicKeyCredentialDescriptorJSON, Base64UrlString};
use crate::{
    ops::webauthn::{ResidentKeyRequirement, UserVerificationRequirement},
    proto::ctap2::Ctap2CredentialType,
};

// https://www.w3.org/TR/webauthn-3/#sctn-parseCreationOptionsFromJSON

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    pub authenticator_attachment: Option<String>,
    pub resident_key: Option<ResidentKeyRequirement>,
    #[serde(default)]
    pub require_resident_key: bool,
    #[serde(default)]
    pub user_verification: UserVerificationRequirement,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PublicKeyCredentialRpEntityJSON {
    /// Defaults to the origin's host when absent.
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialUserEntityJSON {
    pub id: Base64UrlString,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialCreationOptionsJSON {
    pub rp: PublicKeyCredentialRpEntityJSON,
    pub user: PublicKeyCredentialUserEntityJSON,
    pub challenge: Base64UrlString,
    #[serde(rename = "pubKeyCredParams")]
    pub params: Vec<Ctap2CredentialType>,
    /// Milliseconds.
    pub timeout: Option<u32>,
    #[serde(default)]
    pub exclude_credentials: Vec<PublicKeyCredentialDescriptorJSON>,
    pub authenticator_selection: Option<AuthenticatorSelectionCriteria>,
    pub attestation: Option<String>,
}
