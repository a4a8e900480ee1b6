use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::{
    fido::AuthenticatorData,
    ops::webauthn::{
        idl::{CROSS_PLATFORM, PUBLIC_KEY_TYPE},
        AuthenticationExtensionsClientOutputsJSON, AuthenticationResponseJSON,
        AuthenticatorAssertionResponseJSON, Base64UrlString, ClientData, Operation, Origin,
        PublicKeyCredentialRequestOptionsJSON, RelyingPartyId, ResponseContext,
        UserVerificationRequirement, WebAuthnIDL, WebAuthnIDLResponse,
    },
    proto::ctap2::{
        Ctap2PublicKeyCredentialDescriptor, Ctap2PublicKeyCredentialUserEntity, UnknownFields,
    },
    webauthn::error::{Error, PlatformError, ProtocolError},
};

#[derive(Debug, Clone)]
pub struct GetAssertionRequest {
    pub relying_party_id: String,
    /// clientDataHash
    pub hash: Vec<u8>,
    pub origin: String,
    pub client_data_json: String,
    pub allow: Vec<Ctap2PublicKeyCredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
    /// Bounds the interactive commands, when set.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub credential_id: Option<Ctap2PublicKeyCredentialDescriptor>,
    pub authenticator_data: AuthenticatorData,
    pub signature: Vec<u8>,
    pub user: Option<Ctap2PublicKeyCredentialUserEntity>,
    pub credentials_count: Option<u32>,
    pub user_selected: Option<bool>,
    pub large_blob_key: Option<Vec<u8>>,
    /// Response members this crate does not interpret, keyed as the authenticator sent them.
    pub unknown_fields: UnknownFields,
}

impl WebAuthnIDL for GetAssertionRequest {
    type InnerModel = PublicKeyCredentialRequestOptionsJSON;

    #[instrument(skip_all, fields(%origin))]
    fn from_inner_model(origin: &Origin, inner: Self::InnerModel) -> Result<Self, Error> {
        let rp_id = RelyingPartyId::for_origin(origin, inner.relying_party_id.as_deref())?;
        if inner.challenge.is_empty() {
            warn!("Rejecting request options with an empty challenge");
            return Err(Error::Platform(PlatformError::InvalidOptions(
                "challenge is empty".into(),
            )));
        }

        let client_data = ClientData::new(Operation::GetAssertion, &inner.challenge, origin);
        let client_data_json = client_data.to_json()?;
        debug!(
            rp_id = &*rp_id,
            allow = inner.allow_credentials.len(),
            uv = ?inner.uv_requirement,
            "Parsed request options"
        );

        Ok(Self {
            relying_party_id: rp_id.into(),
            hash: ClientData::hash_json(&client_data_json),
            origin: origin.to_string(),
            client_data_json,
            allow: inner
                .allow_credentials
                .into_iter()
                .map(Into::into)
                .collect(),
            user_verification: inner.uv_requirement,
            timeout: inner.timeout.map(|ms| Duration::from_millis(ms.into())),
        })
    }
}

#[cfg(test)]
impl GetAssertionRequest {
    pub fn dummy() -> Self {
        Self {
            relying_party_id: "example.org".to_owned(),
            hash: vec![0; 32],
            origin: "https://example.org".to_owned(),
            client_data_json: "{}".to_owned(),
            allow: vec![],
            user_verification: UserVerificationRequirement::Discouraged,
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl WebAuthnIDLResponse for Assertion {
    type IdlModel = AuthenticationResponseJSON;

    fn to_idl_model(&self, ctx: &ResponseContext) -> Result<AuthenticationResponseJSON, Error> {
        let Some(credential) = self.credential_id.as_ref() else {
            return Err(Error::Protocol(ProtocolError::MissingField("credential")));
        };
        Ok(AuthenticationResponseJSON {
            id: base64_url::encode(&credential.id),
            raw_id: Base64UrlString::from(credential.id.as_slice()),
            response: AuthenticatorAssertionResponseJSON {
                client_data_json: Base64UrlString::from(ctx.client_data_json.as_bytes()),
                authenticator_data: Base64UrlString::from(self.authenticator_data.as_bytes()),
                signature: Base64UrlString::from(self.signature.as_slice()),
                user_handle: self
                    .user
                    .as_ref()
                    .map(|user| Base64UrlString::from(user.id.as_slice())),
            },
            authenticator_attachment: Some(CROSS_PLATFORM.to_owned()),
            client_extension_results: AuthenticationExtensionsClientOutputsJSON::default(),
            r#type: PUBLIC_KEY_TYPE.to_owned(),
        })
    }
}
