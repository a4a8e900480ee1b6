use serde::Serialize;
use serde_bytes::ByteBuf;
use serde_indexed::{DeserializeIndexed, SerializeIndexed};

use super::{
    Ctap2AuthTokenPermissionRole, Ctap2GetInfoResponse, Ctap2PublicKeyCredentialDescriptor,
    Ctap2PublicKeyCredentialUserEntity, Ctap2UserVerifiableRequest,
};
use crate::{
    fido::AuthenticatorData,
    ops::webauthn::{Assertion, GetAssertionRequest},
    pin::PinUvAuthProtocol,
    proto::ctap2::UnknownFields,
    webauthn::error::Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ctap2GetAssertionOptions {
    #[serde(rename = "up")]
    pub require_user_presence: bool,

    #[serde(rename = "uv")]
    #[serde(skip_serializing_if = "Self::skip_serializing_uv")]
    pub require_user_verification: bool,
}

impl Default for Ctap2GetAssertionOptions {
    fn default() -> Self {
        Self {
            require_user_presence: true,
            require_user_verification: false,
        }
    }
}

impl Ctap2GetAssertionOptions {
    fn skip_serializing_uv(uv: &bool) -> bool {
        !uv
    }
}

// https://www.w3.org/TR/webauthn/#authenticatorgetassertion
#[derive(Debug, Clone, PartialEq, SerializeIndexed)]
pub struct Ctap2GetAssertionRequest {
    /// rpId (0x01)
    #[serde(index = 0x01)]
    pub relying_party_id: String,

    /// clientDataHash (0x02)
    #[serde(index = 0x02)]
    pub client_data_hash: ByteBuf,

    /// allowList (0x03)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(index = 0x03)]
    pub allow: Vec<Ctap2PublicKeyCredentialDescriptor>,

    /// options (0x05)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x05)]
    pub options: Option<Ctap2GetAssertionOptions>,

    /// pinUvAuthParam (0x06)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x06)]
    pub pin_auth_param: Option<ByteBuf>,

    /// pinUvAuthProtocol (0x07)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x07)]
    pub pin_auth_proto: Option<u32>,
}

impl From<&GetAssertionRequest> for Ctap2GetAssertionRequest {
    fn from(op: &GetAssertionRequest) -> Self {
        Self {
            relying_party_id: op.relying_party_id.clone(),
            client_data_hash: ByteBuf::from(op.hash.clone()),
            allow: op.allow.clone(),
            options: Some(Ctap2GetAssertionOptions {
                require_user_presence: true,
                require_user_verification: false,
            }),
            pin_auth_param: None,
            pin_auth_proto: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, SerializeIndexed, DeserializeIndexed)]
pub struct Ctap2GetAssertionResponse {
    /// credential (0x01)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x01)]
    pub credential_id: Option<Ctap2PublicKeyCredentialDescriptor>,

    /// authData (0x02)
    #[serde(index = 0x02)]
    pub authenticator_data: AuthenticatorData,

    /// signature (0x03)
    #[serde(index = 0x03)]
    pub signature: ByteBuf,

    /// user (0x04)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x04)]
    pub user: Option<Ctap2PublicKeyCredentialUserEntity>,

    /// numberOfCredentials (0x05)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x05)]
    pub credentials_count: Option<u32>,

    /// userSelected (0x06)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x06)]
    pub user_selected: Option<bool>,

    /// largeBlobKey (0x07)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x07)]
    pub large_blob_key: Option<ByteBuf>,
}

impl Ctap2GetAssertionResponse {
    pub const KNOWN_FIELDS: &'static [i128] = &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];

    pub fn into_assertion_output(
        self,
        request: &GetAssertionRequest,
        unknown_fields: UnknownFields,
    ) -> Assertion {
        // The credential may be omitted if the allowList had exactly one entry
        let credential_id = self.credential_id.or_else(|| match request.allow.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        });
        Assertion {
            credential_id,
            authenticator_data: self.authenticator_data,
            signature: self.signature.into_vec(),
            user: self.user,
            credentials_count: self.credentials_count,
            user_selected: self.user_selected,
            large_blob_key: self.large_blob_key.map(ByteBuf::into_vec),
            unknown_fields,
        }
    }
}

impl Ctap2UserVerifiableRequest for Ctap2GetAssertionRequest {
    fn ensure_uv_set(&mut self) {
        self.options = Some(Ctap2GetAssertionOptions {
            require_user_verification: true,
            ..self.options.unwrap_or_default()
        });
    }

    fn calculate_and_set_uv_auth(
        &mut self,
        uv_proto: &dyn PinUvAuthProtocol,
        uv_auth_token: &[u8],
    ) -> Result<(), Error> {
        let uv_auth_param = uv_proto.authenticate(uv_auth_token, self.client_data_hash())?;
        self.pin_auth_proto = Some(uv_proto.version() as u32);
        self.pin_auth_param = Some(ByteBuf::from(uv_auth_param));
        Ok(())
    }

    fn client_data_hash(&self) -> &[u8] {
        self.client_data_hash.as_slice()
    }

    fn permissions(&self) -> Ctap2AuthTokenPermissionRole {
        Ctap2AuthTokenPermissionRole::GET_ASSERTION
    }

    fn permissions_rpid(&self) -> Option<&str> {
        Some(&self.relying_party_id)
    }

    fn can_use_uv(&self, _info: &Ctap2GetInfoResponse) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::proto::ctap2::cbor::{from_slice, to_vec, CborRequest, Value};
    use crate::proto::ctap2::Ctap2CommandCode;

    #[test]
    fn request_omits_empty_allow_list_and_uv() {
        let request = Ctap2GetAssertionRequest::from(&GetAssertionRequest::dummy());
        let map: BTreeMap<Value, Value> = from_slice(&to_vec(&request).unwrap()).unwrap();
        assert!(!map.contains_key(&Value::Integer(0x03)));
        let Some(Value::Map(options)) = map.get(&Value::Integer(0x05)) else {
            panic!("options missing");
        };
        assert_eq!(options.get(&Value::Text("up".into())), Some(&Value::Bool(true)));
        assert!(!options.contains_key(&Value::Text("uv".into())));
    }

    #[test]
    fn request_encodes_integer_keys() {
        let mut request = GetAssertionRequest::dummy();
        request.allow = vec![
            Ctap2PublicKeyCredentialDescriptor::new(&[1]),
            Ctap2PublicKeyCredentialDescriptor::new(&[2]),
        ];
        let mut ctap = Ctap2GetAssertionRequest::from(&request);
        ctap.options = Some(Ctap2GetAssertionOptions {
            require_user_presence: true,
            require_user_verification: true,
        });
        ctap.pin_auth_param = Some(ByteBuf::from(vec![0xBB; 32]));
        ctap.pin_auth_proto = Some(1);

        let cbor = CborRequest::try_from(&ctap).unwrap();
        assert_eq!(cbor.command, Ctap2CommandCode::AuthenticatorGetAssertion);
        assert_eq!(cbor.to_frame()[0], 0x02);

        let map: BTreeMap<Value, Value> = from_slice(&cbor.encoded_data).unwrap();
        assert_eq!(map.len(), 6);
        for key in [0x01, 0x02, 0x03, 0x05, 0x06, 0x07] {
            assert!(map.contains_key(&Value::Integer(key)), "missing {key:#04x}");
        }
        assert_eq!(
            map.get(&Value::Integer(0x01)),
            Some(&Value::Text("example.org".into()))
        );
        assert_eq!(map.get(&Value::Integer(0x02)), Some(&Value::Bytes(vec![0; 32])));
        let Some(Value::Array(allow)) = map.get(&Value::Integer(0x03)) else {
            panic!("allowList missing");
        };
        assert_eq!(allow.len(), 2);
        let Some(Value::Map(options)) = map.get(&Value::Integer(0x05)) else {
            panic!("options missing");
        };
        assert_eq!(options.get(&Value::Text("uv".into())), Some(&Value::Bool(true)));
        assert_eq!(map.get(&Value::Integer(0x06)), Some(&Value::Bytes(vec![0xBB; 32])));
        assert_eq!(map.get(&Value::Integer(0x07)), Some(&Value::Integer(1)));
    }

    #[test]
    fn single_allowed_credential_fills_missing_id() {
        let mut request = GetAssertionRequest::dummy();
        request.allow = vec![Ctap2PublicKeyCredentialDescriptor::new(&[7, 7])];
        let mut auth_data = vec![0u8; 32];
        auth_data.extend([0x01, 0, 0, 0, 1]);
        let response = Ctap2GetAssertionResponse {
            credential_id: None,
            authenticator_data: AuthenticatorData::from_slice(&auth_data).unwrap(),
            signature: ByteBuf::from(vec![1, 2, 3]),
            user: None,
            credentials_count: None,
            user_selected: None,
            large_blob_key: None,
        };
        let decoded: Ctap2GetAssertionResponse = from_slice(&to_vec(&response).unwrap()).unwrap();
        assert_eq!(decoded, response);
        let assertion = decoded.into_assertion_output(&request, Default::default());
        assert_eq!(
            assertion.credential_id,
            Some(Ctap2PublicKeyCredentialDescriptor::new(&[7, 7]))
        );
        assert_eq!(assertion.signature, vec![1, 2, 3]);
    }
}
