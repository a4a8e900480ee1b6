use bitflags::bitflags;
use cosey::PublicKey;
use serde_bytes::ByteBuf;
use serde_indexed::{DeserializeIndexed, SerializeIndexed};
use serde_repr::{Deserialize_repr, Serialize_repr};

#[derive(Debug, Clone, PartialEq, SerializeIndexed)]
pub struct Ctap2ClientPinRequest {
    /// pinUvAuthProtocol (0x01)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x01)]
    pub protocol: Option<Ctap2PinUvAuthProtocol>,

    /// subCommand (0x02)
    #[serde(index = 0x02)]
    pub command: Ctap2PinUvAuthProtocolCommand,

    /// keyAgreement (0x03)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x03)]
    pub key_agreement: Option<PublicKey>,

    /// pinUvAuthParam (0x04)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x04)]
    pub uv_auth_param: Option<ByteBuf>,

    /// newPinEnc (0x05)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x05)]
    pub new_pin_encrypted: Option<ByteBuf>,

    /// pinHashEnc (0x06)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x06)]
    pub pin_hash_encrypted: Option<ByteBuf>,

    /// permissions (0x09)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x09)]
    pub permissions: Option<u32>,

    /// rpId (0x0A)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x0A)]
    pub permissions_rpid: Option<String>,
}

impl Ctap2ClientPinRequest {
    fn new(protocol: Option<Ctap2PinUvAuthProtocol>, command: Ctap2PinUvAuthProtocolCommand) -> Self {
        Self {
            protocol,
            command,
            key_agreement: None,
            uv_auth_param: None,
            new_pin_encrypted: None,
            pin_hash_encrypted: None,
            permissions: None,
            permissions_rpid: None,
        }
    }

    pub fn new_get_pin_retries(pin_proto: Option<Ctap2PinUvAuthProtocol>) -> Self {
        Self::new(pin_proto, Ctap2PinUvAuthProtocolCommand::GetPinRetries)
    }

    pub fn new_get_uv_retries() -> Self {
        Self::new(None, Ctap2PinUvAuthProtocolCommand::GetUvRetries)
    }

    pub fn new_get_key_agreement(protocol: Ctap2PinUvAuthProtocol) -> Self {
        Self::new(Some(protocol), Ctap2PinUvAuthProtocolCommand::GetKeyAgreement)
    }

    pub fn new_get_pin_token(
        protocol: Ctap2PinUvAuthProtocol,
        public_key: PublicKey,
        pin_hash_enc: &[u8],
    ) -> Self {
        Self {
            key_agreement: Some(public_key),
            pin_hash_encrypted: Some(ByteBuf::from(pin_hash_enc)),
            ..Self::new(Some(protocol), Ctap2PinUvAuthProtocolCommand::GetPinToken)
        }
    }

    pub fn new_get_pin_token_with_perm(
        protocol: Ctap2PinUvAuthProtocol,
        public_key: PublicKey,
        pin_hash_enc: &[u8],
        permissions: Ctap2AuthTokenPermissionRole,
        permissions_rpid: Option<&str>,
    ) -> Self {
        Self {
            key_agreement: Some(public_key),
            pin_hash_encrypted: Some(ByteBuf::from(pin_hash_enc)),
            permissions: Some(permissions.bits()),
            permissions_rpid: permissions_rpid.map(str::to_owned),
            ..Self::new(
                Some(protocol),
                Ctap2PinUvAuthProtocolCommand::GetPinUvAuthTokenUsingPinWithPermissions,
            )
        }
    }

    pub fn new_get_uv_token_with_perm(
        protocol: Ctap2PinUvAuthProtocol,
        public_key: PublicKey,
        permissions: Ctap2AuthTokenPermissionRole,
        permissions_rpid: Option<&str>,
    ) -> Self {
        Self {
            key_agreement: Some(public_key),
            permissions: Some(permissions.bits()),
            permissions_rpid: permissions_rpid.map(str::to_owned),
            ..Self::new(
                Some(protocol),
                Ctap2PinUvAuthProtocolCommand::GetPinUvAuthTokenUsingUvWithPermissions,
            )
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ctap2AuthTokenPermissionRole: u32 {
        const MAKE_CREDENTIAL = 0x01;
        const GET_ASSERTION = 0x02;
        const CREDENTIAL_MANAGEMENT = 0x04;
        const BIO_ENROLLMENT = 0x08;
        const LARGE_BLOB_WRITE = 0x10;
        const AUTHENTICATOR_CONFIGURATION = 0x20;
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
pub enum Ctap2PinUvAuthProtocol {
    One = 1,
    Two = 2,
}

impl TryFrom<u32> for Ctap2PinUvAuthProtocol {
    type Error = u32;
    fn try_from(value: u32) -> Result<Self, u32> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(other),
        }
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
pub enum Ctap2PinUvAuthProtocolCommand {
    GetPinRetries = 0x01,
    GetKeyAgreement = 0x02,
    SetPin = 0x03,
    ChangePin = 0x04,
    GetPinToken = 0x05,
    GetPinUvAuthTokenUsingUvWithPermissions = 0x06,
    GetUvRetries = 0x07,
    GetPinUvAuthTokenUsingPinWithPermissions = 0x09,
}

#[derive(Debug, Clone, Default, PartialEq, SerializeIndexed, DeserializeIndexed)]
pub struct Ctap2ClientPinResponse {
    /// keyAgreement (0x01)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x01)]
    pub key_agreement: Option<PublicKey>,

    /// pinUvAuthToken (0x02)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x02)]
    pub pin_uv_auth_token: Option<ByteBuf>,

    /// pinRetries (0x03)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x03)]
    pub pin_retries: Option<u32>,

    /// powerCycleState (0x04)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x04)]
    pub power_cycle_state: Option<bool>,

    /// uvRetries (0x05)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x05)]
    pub uv_retries: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::tests::authenticator_key_agreement;
    use crate::proto::ctap2::cbor::{from_slice, to_vec, CborRequest, Value};
    use crate::proto::ctap2::Ctap2CommandCode;
    use std::collections::BTreeMap;

    fn encode(request: &Ctap2ClientPinRequest) -> BTreeMap<Value, Value> {
        let cbor = CborRequest::try_from(request).unwrap();
        assert_eq!(cbor.command, Ctap2CommandCode::AuthenticatorClientPin);
        from_slice(&cbor.encoded_data).unwrap()
    }

    #[test]
    fn get_key_agreement_request() {
        let map = encode(&Ctap2ClientPinRequest::new_get_key_agreement(
            Ctap2PinUvAuthProtocol::One,
        ));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&Value::Integer(0x01)), Some(&Value::Integer(1)));
        assert_eq!(map.get(&Value::Integer(0x02)), Some(&Value::Integer(0x02)));
    }

    #[test]
    fn get_pin_retries_request() {
        let map = encode(&Ctap2ClientPinRequest::new_get_pin_retries(None));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::Integer(0x02)), Some(&Value::Integer(0x01)));
    }

    #[test]
    fn pin_token_with_permissions_request() {
        let request = Ctap2ClientPinRequest::new_get_pin_token_with_perm(
            Ctap2PinUvAuthProtocol::Two,
            authenticator_key_agreement(),
            &[0xCC; 32],
            Ctap2AuthTokenPermissionRole::MAKE_CREDENTIAL | Ctap2AuthTokenPermissionRole::GET_ASSERTION,
            Some("example.org"),
        );
        let map = encode(&request);
        assert_eq!(map.len(), 6);
        assert_eq!(map.get(&Value::Integer(0x01)), Some(&Value::Integer(2)));
        assert_eq!(map.get(&Value::Integer(0x02)), Some(&Value::Integer(0x09)));
        let Some(Value::Map(key_agreement)) = map.get(&Value::Integer(0x03)) else {
            panic!("keyAgreement missing");
        };
        // kty: EC2
        assert_eq!(key_agreement.get(&Value::Integer(1)), Some(&Value::Integer(2)));
        assert_eq!(map.get(&Value::Integer(0x06)), Some(&Value::Bytes(vec![0xCC; 32])));
        assert_eq!(map.get(&Value::Integer(0x09)), Some(&Value::Integer(0x03)));
        assert_eq!(
            map.get(&Value::Integer(0x0A)),
            Some(&Value::Text("example.org".into()))
        );
        assert!(!map.contains_key(&Value::Integer(0x04)));
    }

    #[test]
    fn permissions_request_uses_rpid_key_0x0a() {
        let request = Ctap2ClientPinRequest {
            permissions: Some(Ctap2AuthTokenPermissionRole::GET_ASSERTION.bits()),
            permissions_rpid: Some("example.org".into()),
            ..Ctap2ClientPinRequest::new_get_uv_retries()
        };
        let map: BTreeMap<Value, Value> = from_slice(&to_vec(&request).unwrap()).unwrap();
        assert_eq!(map.get(&Value::Integer(0x02)), Some(&Value::Integer(0x07)));
        assert_eq!(map.get(&Value::Integer(0x09)), Some(&Value::Integer(0x02)));
        assert_eq!(
            map.get(&Value::Integer(0x0A)),
            Some(&Value::Text("example.org".into()))
        );
        assert!(!map.contains_key(&Value::Integer(0x01)));
    }

    #[test]
    fn response_ignores_unknown_keys() {
        let mut map = BTreeMap::new();
        map.insert(Value::Integer(0x03), Value::Integer(5));
        map.insert(Value::Integer(0x04), Value::Bool(true));
        map.insert(Value::Integer(0x42), Value::Text("vendor".into()));
        let response: Ctap2ClientPinResponse = from_slice(&to_vec(&map).unwrap()).unwrap();
        assert_eq!(response.pin_retries, Some(5));
        assert_eq!(response.power_cycle_state, Some(true));
        assert_eq!(response.uv_retries, None);
    }

    #[test]
    fn protocol_from_version_number() {
        assert_eq!(Ctap2PinUvAuthProtocol::try_from(2), Ok(Ctap2PinUvAuthProtocol::Two));
        assert_eq!(Ctap2PinUvAuthProtocol::try_from(3), Err(3));
    }
}
