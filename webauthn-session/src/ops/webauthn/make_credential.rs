use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tracing::{debug, instrument, warn};

use crate::{
    fido::AuthenticatorData,
    ops::webauthn::{
        idl::{CROSS_PLATFORM, PUBLIC_KEY_TYPE},
        AuthenticationExtensionsClientOutputsJSON, AuthenticatorAttestationResponseJSON,
        Base64UrlString, ClientData, Operation, Origin, PublicKeyCredentialCreationOptionsJSON,
        RegistrationResponseJSON, RelyingPartyId, ResponseContext, UserVerificationRequirement,
        WebAuthnIDL, WebAuthnIDLResponse,
    },
    proto::ctap2::{
        cbor::{self, Value},
        Ctap2COSEAlgorithmIdentifier, Ctap2CredentialType, Ctap2PublicKeyCredentialDescriptor,
        Ctap2PublicKeyCredentialRpEntity, Ctap2PublicKeyCredentialUserEntity, UnknownFields,
    },
    webauthn::error::{Error, PlatformError, ProtocolError},
};

#[derive(Debug, Clone, PartialEq)]
pub struct MakeCredentialResponse {
    pub format: String,
    pub authenticator_data: AuthenticatorData,
    pub attestation_statement: Value,
    pub enterprise_attestation: Option<bool>,
    pub large_blob_key: Option<Vec<u8>>,
    /// Response members this crate does not interpret, keyed as the authenticator sent them.
    pub unknown_fields: UnknownFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ResidentKeyRequirement {
    #[serde(rename = "required")]
    Required,
    #[serde(rename = "preferred")]
    Preferred,
    #[serde(rename = "discouraged", other)]
    Discouraged,
}

#[derive(Debug, Clone)]
pub struct MakeCredentialRequest {
    /// clientDataHash
    pub hash: Vec<u8>,
    pub origin: String,
    pub client_data_json: String,
    /// rpEntity
    pub relying_party: Ctap2PublicKeyCredentialRpEntity,
    /// userEntity
    pub user: Ctap2PublicKeyCredentialUserEntity,
    pub resident_key: Option<ResidentKeyRequirement>,
    pub user_verification: UserVerificationRequirement,
    /// credTypesAndPubKeyAlgs
    pub algorithms: Vec<Ctap2CredentialType>,
    /// excludeCredentialDescriptorList
    pub exclude: Option<Vec<Ctap2PublicKeyCredentialDescriptor>>,
    /// Bounds the interactive commands, when set.
    pub timeout: Option<Duration>,
}

fn invalid_options(reason: &str) -> Error {
    warn!(reason, "Rejecting creation options");
    Error::Platform(PlatformError::InvalidOptions(reason.to_owned()))
}

impl WebAuthnIDL for MakeCredentialRequest {
    type InnerModel = PublicKeyCredentialCreationOptionsJSON;

    #[instrument(skip_all, fields(%origin))]
    fn from_inner_model(origin: &Origin, inner: Self::InnerModel) -> Result<Self, Error> {
        let rp_id = RelyingPartyId::for_origin(origin, inner.rp.id.as_deref())?;
        if inner.challenge.is_empty() {
            return Err(invalid_options("challenge is empty"));
        }
        if inner.user.id.is_empty() || inner.user.id.len() > 64 {
            return Err(invalid_options("user.id must be between 1 and 64 bytes"));
        }

        let resident_key = match &inner.authenticator_selection {
            Some(selection) if selection.require_resident_key => {
                Some(ResidentKeyRequirement::Required)
            }
            Some(selection) => selection.resident_key,
            None => None,
        };
        let user_verification = inner
            .authenticator_selection
            .as_ref()
            .map_or(UserVerificationRequirement::Preferred, |s| {
                s.user_verification
            });

        // An empty list means ES256 and RS256
        let algorithms = match inner.params[..] {
            [] => vec![
                Ctap2CredentialType::new(Ctap2COSEAlgorithmIdentifier::ES256),
                Ctap2CredentialType::new(Ctap2COSEAlgorithmIdentifier::RS256),
            ],
            _ => inner.params,
        };
        let exclude = match inner.exclude_credentials[..] {
            [] => None,
            _ => Some(
                inner
                    .exclude_credentials
                    .into_iter()
                    .map(Into::into)
                    .collect(),
            ),
        };

        let client_data = ClientData::new(Operation::MakeCredential, &inner.challenge, origin);
        let client_data_json = client_data.to_json()?;
        debug!(rp_id = &*rp_id, ?resident_key, ?user_verification, "Parsed creation options");

        Ok(Self {
            hash: ClientData::hash_json(&client_data_json),
            origin: origin.to_string(),
            client_data_json,
            relying_party: Ctap2PublicKeyCredentialRpEntity {
                id: rp_id.into(),
                name: inner.rp.name,
            },
            user: Ctap2PublicKeyCredentialUserEntity {
                id: ByteBuf::from(inner.user.id.0),
                name: Some(inner.user.name),
                display_name: Some(inner.user.display_name),
            },
            resident_key,
            user_verification,
            algorithms,
            exclude,
            timeout: inner.timeout.map(|ms| Duration::from_millis(ms.into())),
        })
    }
}

#[cfg(test)]
impl MakeCredentialRequest {
    pub fn dummy() -> Self {
        Self {
            hash: vec![0; 32],
            origin: "https://example.org".to_owned(),
            client_data_json: "{}".to_owned(),
            relying_party: Ctap2PublicKeyCredentialRpEntity::new("example.org", Some("Example")),
            user: Ctap2PublicKeyCredentialUserEntity::new(&[1, 2, 3], "mario", "Mario"),
            algorithms: vec![Ctap2CredentialType::default()],
            exclude: None,
            resident_key: None,
            user_verification: UserVerificationRequirement::Discouraged,
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

#[derive(Serialize)]
struct AttestationObject<'a> {
    fmt: &'a str,
    #[serde(rename = "attStmt")]
    att_stmt: &'a Value,
    #[serde(rename = "authData")]
    auth_data: &'a AuthenticatorData,
}

impl MakeCredentialResponse {
    /// The CBOR attestation object `{fmt, attStmt, authData}`.
    pub fn attestation_object(&self) -> Result<Vec<u8>, Error> {
        let object = AttestationObject {
            fmt: &self.format,
            att_stmt: &self.attestation_statement,
            auth_data: &self.authenticator_data,
        };
        Ok(cbor::to_vec(&object)?)
    }
}

impl WebAuthnIDLResponse for MakeCredentialResponse {
    type IdlModel = RegistrationResponseJSON;

    fn to_idl_model(&self, ctx: &ResponseContext) -> Result<RegistrationResponseJSON, Error> {
        let Some(attested) = self.authenticator_data.attested_credential.as_ref() else {
            return Err(Error::Protocol(ProtocolError::MissingField(
                "attestedCredentialData",
            )));
        };

        let (public_key, public_key_algorithm) = match attested.public_key_spki() {
            Ok((spki, alg)) => (Some(Base64UrlString(spki)), i32::from(alg) as i64),
            Err(_) => {
                // The key is still in the attestation object, only the shortcut is missing
                let key: BTreeMap<Value, Value> = cbor::from_slice(&attested.credential_public_key)?;
                match key.get(&Value::Integer(3)) {
                    Some(Value::Integer(alg)) => (None, *alg as i64),
                    _ => return Err(Error::Protocol(ProtocolError::UnsupportedPublicKey)),
                }
            }
        };

        Ok(RegistrationResponseJSON {
            id: base64_url::encode(&attested.credential_id),
            raw_id: Base64UrlString::from(attested.credential_id.as_slice()),
            response: AuthenticatorAttestationResponseJSON {
                client_data_json: Base64UrlString::from(ctx.client_data_json.as_bytes()),
                authenticator_data: Base64UrlString::from(self.authenticator_data.as_bytes()),
                transports: ctx.transports.clone(),
                public_key,
                public_key_algorithm,
                attestation_object: Base64UrlString(self.attestation_object()?),
            },
            authenticator_attachment: Some(CROSS_PLATFORM.to_owned()),
            client_extension_results: AuthenticationExtensionsClientOutputsJSON::default(),
            r#type: PUBLIC_KEY_TYPE.to_owned(),
        })
    }
}
