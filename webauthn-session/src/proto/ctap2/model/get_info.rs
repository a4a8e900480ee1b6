use std::collections::HashMap;

use serde_bytes::ByteBuf;
use serde_indexed::{DeserializeIndexed, SerializeIndexed};
use tracing::debug;

use super::{Ctap2CredentialType, Ctap2PinUvAuthProtocol, Ctap2UserVerificationOperation};

/// The authenticatorGetInfo members this crate acts on. Everything else the
/// authenticator reports is kept in [`Ctap2Reply::unknown_fields`](crate::proto::ctap2::Ctap2Reply).
#[derive(Debug, Clone, PartialEq, SerializeIndexed, DeserializeIndexed, Default)]
pub struct Ctap2GetInfoResponse {
    #[serde(index = 0x01)]
    pub versions: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x02)]
    pub extensions: Option<Vec<String>>,

    #[serde(index = 0x03)]
    pub aaguid: ByteBuf,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x04)]
    pub options: Option<HashMap<String, bool>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x05)]
    pub max_msg_size: Option<u32>,

    /// pinUvAuthProtocols
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x06)]
    pub pin_auth_protos: Option<Vec<u32>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x09)]
    pub transports: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x0A)]
    pub algorithms: Option<Vec<Ctap2CredentialType>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x0D)]
    pub min_pin_length: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x0E)]
    pub firmware_version: Option<u32>,
}

impl Ctap2GetInfoResponse {
    pub const KNOWN_FIELDS: &'static [i128] =
        &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x09, 0x0A, 0x0D, 0x0E];

    /// `None` when the authenticator does not report the option at all.
    pub fn option(&self, name: &str) -> Option<bool> {
        self.options.as_ref()?.get(name).copied()
    }

    pub fn option_enabled(&self, name: &str) -> bool {
        self.option(name) == Some(true)
    }

    pub fn supports_fido_2_1(&self) -> bool {
        self.versions.iter().any(|v| v == "FIDO_2_1")
    }

    /// Reported as `bioEnroll`, or `userVerificationMgmtPreview` on pre-2.1 firmware,
    /// whether or not a fingerprint is enrolled yet.
    pub fn supports_bio_enrollment(&self) -> bool {
        self.option("bioEnroll").is_some() || self.option("userVerificationMgmtPreview").is_some()
    }

    /// PIN/UV auth protocols both sides support, in the order of `preference`.
    pub fn pin_uv_auth_protocols(&self, preference: &[u32]) -> Vec<Ctap2PinUvAuthProtocol> {
        let supported = self.pin_auth_protos.as_deref().unwrap_or(&[]);
        preference
            .iter()
            .filter(|version| supported.contains(version))
            .filter_map(|version| Ctap2PinUvAuthProtocol::try_from(*version).ok())
            .collect()
    }

    /// A PIN is set or built-in user verification is enrolled.
    pub fn is_uv_protected(&self) -> bool {
        self.option_enabled("uv") || self.option_enabled("clientPin")
    }

    /// How to verify the user next. With `uv_blocked`, built-in verification is skipped
    /// and only PIN based operations are considered.
    pub fn uv_operation(&self, uv_blocked: bool) -> Option<Ctap2UserVerificationOperation> {
        use Ctap2UserVerificationOperation::*;

        let pin_uv_auth_token = self.option_enabled("pinUvAuthToken");
        let operation = if !uv_blocked && self.option_enabled("uv") {
            Some(if pin_uv_auth_token {
                GetPinUvAuthTokenUsingUvWithPermissions
            } else {
                LegacyUv
            })
        } else {
            match self.option("clientPin") {
                Some(true) if pin_uv_auth_token => Some(GetPinUvAuthTokenUsingPinWithPermissions),
                Some(true) => Some(GetPinToken),
                // No PIN set yet, ClientPIN only serves key agreement
                Some(false) => Some(ClientPinOnlyForSharedSecret),
                None if pin_uv_auth_token && self.option("uv").is_some() => {
                    Some(ClientPinOnlyForSharedSecret)
                }
                None => None,
            }
        };
        debug!(?operation, uv_blocked, "User verification operation");
        operation
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::proto::ctap2::cbor::{from_slice, to_vec, CborRequest, Value};
    use crate::proto::ctap2::Ctap2CommandCode;
    use Ctap2UserVerificationOperation::*;

    fn create_info(options: &[(&str, bool)]) -> Ctap2GetInfoResponse {
        Ctap2GetInfoResponse {
            options: Some(
                options
                    .iter()
                    .map(|(key, value)| (key.to_string(), *value))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn uv_operation_by_options() {
        let cases: &[(&[(&str, bool)], bool, Option<Ctap2UserVerificationOperation>, Option<Ctap2UserVerificationOperation>)] = &[
            (&[], false, None, None),
            (&[("uv", true)], true, Some(LegacyUv), None),
            (&[("uv", false)], false, None, None),
            (&[("clientPin", true)], true, Some(GetPinToken), Some(GetPinToken)),
            (
                &[("clientPin", false)],
                false,
                Some(ClientPinOnlyForSharedSecret),
                Some(ClientPinOnlyForSharedSecret),
            ),
            (
                &[("clientPin", true), ("uv", true)],
                true,
                Some(LegacyUv),
                Some(GetPinToken),
            ),
            (
                &[("clientPin", true), ("pinUvAuthToken", true)],
                true,
                Some(GetPinUvAuthTokenUsingPinWithPermissions),
                Some(GetPinUvAuthTokenUsingPinWithPermissions),
            ),
            (
                &[("uv", true), ("pinUvAuthToken", true)],
                true,
                Some(GetPinUvAuthTokenUsingUvWithPermissions),
                Some(ClientPinOnlyForSharedSecret),
            ),
            (
                &[("clientPin", true), ("uv", true), ("pinUvAuthToken", true)],
                true,
                Some(GetPinUvAuthTokenUsingUvWithPermissions),
                Some(GetPinUvAuthTokenUsingPinWithPermissions),
            ),
            (
                &[("clientPin", false), ("uv", false), ("pinUvAuthToken", true)],
                false,
                Some(ClientPinOnlyForSharedSecret),
                Some(ClientPinOnlyForSharedSecret),
            ),
            // pinUvAuthToken without any way to get one
            (&[("pinUvAuthToken", true)], false, None, None),
        ];
        for (options, protected, with_uv, uv_blocked) in cases {
            let info = create_info(options);
            assert_eq!(info.is_uv_protected(), *protected, "{options:?}");
            assert_eq!(info.uv_operation(false), *with_uv, "{options:?}");
            assert_eq!(info.uv_operation(true), *uv_blocked, "{options:?} with UV blocked");
        }
    }

    #[test]
    fn pin_protocol_preference() {
        let mut info = create_info(&[("clientPin", true)]);
        assert!(info.pin_uv_auth_protocols(&[2, 1]).is_empty());

        info.pin_auth_protos = Some(vec![1, 2]);
        assert_eq!(
            info.pin_uv_auth_protocols(&[2, 1]),
            vec![Ctap2PinUvAuthProtocol::Two, Ctap2PinUvAuthProtocol::One]
        );
        assert_eq!(info.pin_uv_auth_protocols(&[1]), vec![Ctap2PinUvAuthProtocol::One]);

        info.pin_auth_protos = Some(vec![1, 7]);
        assert_eq!(info.pin_uv_auth_protocols(&[2, 1]), vec![Ctap2PinUvAuthProtocol::One]);
    }

    #[test]
    fn bio_enrollment_support() {
        assert!(create_info(&[("bioEnroll", false)]).supports_bio_enrollment());
        assert!(create_info(&[("userVerificationMgmtPreview", true)]).supports_bio_enrollment());
        assert!(!create_info(&[("uv", true)]).supports_bio_enrollment());
        assert!(!Ctap2GetInfoResponse::default().supports_bio_enrollment());
    }

    #[test]
    fn fido_2_1_version() {
        let mut info = Ctap2GetInfoResponse::default();
        info.versions = vec!["FIDO_2_0".into()];
        assert!(!info.supports_fido_2_1());
        info.versions.push("FIDO_2_1".into());
        assert!(info.supports_fido_2_1());
    }

    #[test]
    fn request_is_the_bare_command() {
        let request = CborRequest::new(Ctap2CommandCode::AuthenticatorGetInfo);
        assert!(request.encoded_data.is_empty());
        assert_eq!(request.to_frame(), vec![0x04]);
    }

    #[test]
    fn known_fields_match_encoding() {
        let info = Ctap2GetInfoResponse {
            versions: vec!["FIDO_2_0".into(), "FIDO_2_1".into()],
            extensions: Some(vec!["credProtect".into()]),
            aaguid: ByteBuf::from(vec![0x11; 16]),
            options: Some(HashMap::from([("rk".to_string(), true)])),
            max_msg_size: Some(1200),
            pin_auth_protos: Some(vec![2, 1]),
            transports: Some(vec!["usb".into()]),
            algorithms: Some(vec![Ctap2CredentialType::default()]),
            min_pin_length: Some(4),
            firmware_version: Some(7),
        };
        let encoded = to_vec(&info).unwrap();
        let map: BTreeMap<Value, Value> = from_slice(&encoded).unwrap();
        let mut keys: Vec<i128> = map
            .keys()
            .filter_map(|key| match key {
                Value::Integer(key) => Some(*key),
                _ => None,
            })
            .collect();
        keys.sort();
        assert_eq!(keys, Ctap2GetInfoResponse::KNOWN_FIELDS);
        assert_eq!(map.get(&Value::Integer(0x05)), Some(&Value::Integer(1200)));

        let decoded: Ctap2GetInfoResponse = from_slice(&encoded).unwrap();
        assert_eq!(decoded, info);
    }
}
