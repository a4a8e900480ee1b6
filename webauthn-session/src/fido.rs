use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use cosey::PublicKey;
use serde::{
    de::{Error as DesError, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_bytes::ByteBuf;
use std::{
    fmt,
    io::{Cursor, Read},
};
use tracing::warn;

use crate::proto::ctap2::cbor::{self, Value};
use crate::proto::ctap2::{Ctap2COSEAlgorithmIdentifier, Ctap2PublicKeyCredentialDescriptor};
use crate::webauthn::error::{Error, ProtocolError};

// DER SubjectPublicKeyInfo headers, followed by the raw key
const P256_SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a,
    0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];
const ED25519_SPKI_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AuthenticatorDataFlags: u8 {
        const USER_PRESENT = 0x01;
        const RFU_1 = 0x02;
        const USER_VERIFIED = 0x04;
        const RFU_2_1 = 0x08;
        const RFU_2_2 = 0x10;
        const RFU_2_3 = 0x20;
        const ATTESTED_CREDENTIALS = 0x40;
        const EXTENSION_DATA = 0x80;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE_Key, exactly as encoded by the authenticator.
    pub credential_public_key: Vec<u8>,
}

impl AttestedCredentialData {
    pub fn new(
        aaguid: [u8; 16],
        credential_id: &[u8],
        public_key: &PublicKey,
    ) -> Result<Self, Error> {
        Ok(Self {
            aaguid,
            credential_id: credential_id.to_vec(),
            credential_public_key: cbor::to_vec(public_key)?,
        })
    }

    pub fn public_key(&self) -> Result<PublicKey, Error> {
        cbor::from_slice(&self.credential_public_key).map_err(|e| {
            warn!(%e, "Unsupported credential public key");
            Error::Protocol(ProtocolError::UnsupportedPublicKey)
        })
    }

    /// DER SubjectPublicKeyInfo of the credential key, with its COSE algorithm.
    pub fn public_key_spki(&self) -> Result<(Vec<u8>, Ctap2COSEAlgorithmIdentifier), Error> {
        match self.public_key()? {
            PublicKey::P256Key(key) => {
                let mut spki = P256_SPKI_PREFIX.to_vec();
                spki.push(0x04);
                spki.extend_from_slice(&key.x);
                spki.extend_from_slice(&key.y);
                Ok((spki, Ctap2COSEAlgorithmIdentifier::ES256))
            }
            PublicKey::Ed25519Key(key) => {
                let mut spki = ED25519_SPKI_PREFIX.to_vec();
                spki.extend_from_slice(&key.x);
                Ok((spki, Ctap2COSEAlgorithmIdentifier::EDDSA))
            }
            _ => Err(Error::Protocol(ProtocolError::UnsupportedPublicKey)),
        }
    }
}

impl From<&AttestedCredentialData> for Ctap2PublicKeyCredentialDescriptor {
    fn from(data: &AttestedCredentialData) -> Self {
        Ctap2PublicKeyCredentialDescriptor::new(&data.credential_id)
    }
}

/// Parsed authenticator data. The original bytes are kept so that signatures over them
/// stay verifiable, including any content this crate does not interpret.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: AuthenticatorDataFlags,
    pub signature_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
    pub extensions: Option<Value>,
    raw: Vec<u8>,
}

fn invalid(reason: &str) -> ProtocolError {
    ProtocolError::InvalidAuthenticatorData(reason.to_string())
}

impl AuthenticatorData {
    pub fn new(
        rp_id_hash: [u8; 32],
        flags: AuthenticatorDataFlags,
        signature_count: u32,
        attested_credential: Option<AttestedCredentialData>,
        extensions: Option<Value>,
    ) -> Result<Self, Error> {
        // Name                    | Length
        // -----------------------------------
        // rpIdHash                | 32
        // flags                   | 1
        // signCount               | 4
        // attestedCredentialData  | variable
        // extensions              | variable
        let mut flags = flags;
        flags.set(
            AuthenticatorDataFlags::ATTESTED_CREDENTIALS,
            attested_credential.is_some(),
        );
        flags.set(AuthenticatorDataFlags::EXTENSION_DATA, extensions.is_some());

        let mut raw = rp_id_hash.to_vec();
        raw.push(flags.bits());
        raw.extend(signature_count.to_be_bytes());

        if let Some(att_data) = &attested_credential {
            let credential_id_len = u16::try_from(att_data.credential_id.len())
                .map_err(|_| invalid("credential id too long"))?;
            raw.extend(att_data.aaguid);
            raw.write_u16::<BigEndian>(credential_id_len)
                .map_err(|_| invalid("credential id length"))?;
            raw.extend(&att_data.credential_id);
            raw.extend(&att_data.credential_public_key);
        }

        if let Some(extensions) = &extensions {
            raw.extend(cbor::to_vec(extensions)?);
        }

        Ok(Self {
            rp_id_hash,
            flags,
            signature_count,
            attested_credential,
            extensions,
            raw,
        })
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        // Name                    | Length      | Start index
        // ---------------------------------------------------
        // rpIdHash                | 32          | 0
        // flags                   | 1           | 32
        // signCount               | 4           | 33
        // attestedCredentialData  | variable    |
        //     aaguid              |    16       | 37
        //     credentialIdLength  |    2        | 53
        //     credentialId        |    L        | 55
        //     credentialPublicKey |    variable |
        // extensions              | variable    | variable
        let mut cursor = Cursor::new(data);
        let mut rp_id_hash = [0u8; 32];
        cursor
            .read_exact(&mut rp_id_hash)
            .map_err(|_| invalid("truncated before flags"))?;
        let flags_raw = cursor.read_u8().map_err(|_| invalid("missing flags"))?;
        let flags = AuthenticatorDataFlags::from_bits_truncate(flags_raw);
        let signature_count = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| invalid("missing signature counter"))?;

        let attested_credential = if flags.contains(AuthenticatorDataFlags::ATTESTED_CREDENTIALS)
        {
            let mut aaguid = [0u8; 16];
            cursor
                .read_exact(&mut aaguid)
                .map_err(|_| invalid("missing aaguid"))?;
            let credential_id_len = cursor
                .read_u16::<BigEndian>()
                .map_err(|_| invalid("missing credential id length"))?
                as usize;
            let mut credential_id = vec![0u8; credential_id_len];
            cursor
                .read_exact(&mut credential_id)
                .map_err(|_| invalid("truncated credential id"))?;

            let key_start = cursor.position() as usize;
            let _: Value = cbor::from_cursor(&mut cursor)?;
            let key_end = cursor.position() as usize;

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                credential_public_key: data[key_start..key_end].to_vec(),
            })
        } else {
            None
        };

        let extensions = if flags.contains(AuthenticatorDataFlags::EXTENSION_DATA) {
            Some(cbor::from_cursor::<Value>(&mut cursor)?)
        } else {
            None
        };

        if (cursor.position() as usize) < data.len() {
            return Err(invalid("trailing data"));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            signature_count,
            attested_credential,
            extensions,
            raw: data.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn credential_descriptor(&self) -> Option<Ctap2PublicKeyCredentialDescriptor> {
        self.attested_credential.as_ref().map(Into::into)
    }
}

impl Serialize for AuthenticatorData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.raw)
    }
}

impl<'de> Deserialize<'de> for AuthenticatorData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AuthenticatorDataVisitor;

        impl<'de> Visitor<'de> for AuthenticatorDataVisitor {
            type Value = AuthenticatorData;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("ByteBuf: Authenticator data")
            }

            fn visit_bytes<E>(self, data: &[u8]) -> Result<Self::Value, E>
            where
                E: DesError,
            {
                AuthenticatorData::from_slice(data).map_err(DesError::custom)
            }
        }

        deserializer.deserialize_bytes(AuthenticatorDataVisitor)
    }
}

impl TryFrom<ByteBuf> for AuthenticatorData {
    type Error = ProtocolError;
    fn try_from(value: ByteBuf) -> Result<Self, Self::Error> {
        Self::from_slice(&value)
    }
}

#[cfg(test)]
mod tests {
    use cosey::{Bytes, Ed25519PublicKey, P256PublicKey};
    use serde_bytes::ByteBuf;

    use crate::proto::ctap2::cbor::{self, Value};
    use crate::proto::ctap2::Ctap2COSEAlgorithmIdentifier;
    use crate::webauthn::error::{Error, ProtocolError};

    use super::{AttestedCredentialData, AuthenticatorData, AuthenticatorDataFlags};

    // SHA-256 'example.com'
    const RP_ID_HASH: [u8; 32] = [
        0xa3, 0x79, 0xa6, 0xf6, 0xee, 0xaf, 0xb9, 0xa5, 0x5e, 0x37, 0x8c, 0x11, 0x80, 0x34, 0xe2,
        0x75, 0x1e, 0x68, 0x2f, 0xab, 0x9f, 0x2d, 0x30, 0xab, 0x13, 0xd2, 0x12, 0x55, 0x86, 0xce,
        0x19, 0x47,
    ];

    #[test]
    fn test_serialize_auth_data() {
        let flags = AuthenticatorDataFlags::USER_PRESENT | AuthenticatorDataFlags::USER_VERIFIED;
        let aaguid = [
            0x24, 0x38, 0x65, 0x2a, 0xbe, 0x9f, 0xbd, 0x84, 0x81, 0x0a, 0x84, 0x0d, 0x6f, 0xc4,
            0x42, 0xa8,
        ];
        let credential_id = vec![0x01, 0x01, 0x03, 0x03, 0x05, 0x05, 0x07, 0x07];
        let pub_key_bytes = b"]\"\xff\xc5\x932x(\xd6-:1\xbb}\x8c$7\xf1&\xd4\xb4&\x02\x02\xa3\xd9\xe2\xba1\x1f\xec\xba";
        let credential_public_key = cosey::PublicKey::Ed25519Key(Ed25519PublicKey {
            x: Bytes::from_slice(pub_key_bytes).unwrap(),
        });
        // {1: 1, 3: -8, -1: 6, -2: h'5D22..'}
        let mut cose_bytes = vec![0xa4, 0x01, 0x01, 0x03, 0x27, 0x20, 0x06, 0x21, 0x58, 0x20];
        cose_bytes.extend(pub_key_bytes);
        let attested_credential =
            AttestedCredentialData::new(aaguid, &credential_id, &credential_public_key).unwrap();
        assert_eq!(attested_credential.credential_public_key, cose_bytes);

        let extensions = Value::Text("test cbor serializable thing".to_string());
        let auth_data = AuthenticatorData::new(
            RP_ID_HASH,
            flags,
            0,
            Some(attested_credential.clone()),
            Some(extensions.clone()),
        )
        .unwrap();
        let bytes = auth_data.as_bytes();
        assert_eq!(RP_ID_HASH, &bytes[..32]);
        assert_eq!(0b1100_0101, bytes[32]);
        assert_eq!([0, 0, 0, 0], bytes[33..37]);
        assert_eq!(aaguid, &bytes[37..37 + 16]);
        assert_eq!([0x00, 0x08], bytes[53..55]);
        assert_eq!(&credential_id, &bytes[55..55 + credential_id.len()]);

        let wrapped = cbor::to_vec(&ByteBuf::from(bytes.to_vec())).unwrap();
        let reparsed: AuthenticatorData = cbor::from_slice(&wrapped).unwrap();
        assert_eq!(reparsed, auth_data);
        assert_eq!(reparsed.attested_credential, Some(attested_credential));
        assert_eq!(reparsed.extensions, Some(extensions));
        assert_eq!(cbor::to_vec(&reparsed).unwrap(), wrapped);
    }

    #[test]
    fn minimal_assertion_data() {
        let mut bytes = RP_ID_HASH.to_vec();
        bytes.push(0x05);
        bytes.extend([0x00, 0x00, 0x01, 0x02]);
        let auth_data = AuthenticatorData::from_slice(&bytes).unwrap();
        assert_eq!(
            auth_data.flags,
            AuthenticatorDataFlags::USER_PRESENT | AuthenticatorDataFlags::USER_VERIFIED
        );
        assert_eq!(auth_data.signature_count, 258);
        assert!(auth_data.attested_credential.is_none());
        assert!(auth_data.credential_descriptor().is_none());
        assert_eq!(auth_data.as_bytes(), bytes.as_slice());
    }

    #[test]
    fn rejects_truncated_and_trailing_data() {
        let mut bytes = RP_ID_HASH.to_vec();
        bytes.push(0x01);
        assert!(matches!(
            AuthenticatorData::from_slice(&bytes),
            Err(ProtocolError::InvalidAuthenticatorData(_))
        ));

        bytes.extend([0, 0, 0, 0, 0xFF]);
        assert_eq!(
            AuthenticatorData::from_slice(&bytes),
            Err(ProtocolError::InvalidAuthenticatorData("trailing data".into()))
        );

        // AT flag set, but the credential id is cut short
        let mut bytes = RP_ID_HASH.to_vec();
        bytes.push(0x41);
        bytes.extend([0, 0, 0, 0]);
        bytes.extend([0u8; 16]);
        bytes.extend([0x00, 0x10, 0x01]);
        assert!(AuthenticatorData::from_slice(&bytes).is_err());
    }

    #[test]
    fn p256_spki() {
        let x = [0x11u8; 32];
        let y = [0x22u8; 32];
        let key = cosey::PublicKey::P256Key(P256PublicKey {
            x: Bytes::from_slice(&x).unwrap(),
            y: Bytes::from_slice(&y).unwrap(),
        });
        let attested = AttestedCredentialData::new([0; 16], &[9, 9], &key).unwrap();
        let (spki, alg) = attested.public_key_spki().unwrap();
        assert_eq!(alg, Ctap2COSEAlgorithmIdentifier::ES256);
        assert_eq!(spki.len(), 91);
        assert_eq!(
            hex::encode(&spki[..27]),
            "3059301306072a8648ce3d020106082a8648ce3d03010703420004"
        );
        assert_eq!(&spki[27..59], &x);
        assert_eq!(&spki[59..], &y);
    }

    #[test]
    fn ed25519_spki() {
        let key = cosey::PublicKey::Ed25519Key(Ed25519PublicKey {
            x: Bytes::from_slice(&[0x33u8; 32]).unwrap(),
        });
        let attested = AttestedCredentialData::new([0; 16], &[1], &key).unwrap();
        let (spki, alg) = attested.public_key_spki().unwrap();
        assert_eq!(alg, Ctap2COSEAlgorithmIdentifier::EDDSA);
        assert_eq!(hex::encode(&spki[..12]), "302a300506032b6570032100");
        assert_eq!(spki.len(), 44);
    }

    #[test]
    fn unknown_key_type_is_kept_but_not_converted() {
        // {1: 3, 3: -257}: an RSA key without parameters
        let attested = AttestedCredentialData {
            aaguid: [0; 16],
            credential_id: vec![1],
            credential_public_key: vec![0xa2, 0x01, 0x03, 0x03, 0x39, 0x01, 0x00],
        };
        let auth_data =
            AuthenticatorData::new(RP_ID_HASH, AuthenticatorDataFlags::USER_PRESENT, 1, Some(attested.clone()), None)
                .unwrap();
        let reparsed = AuthenticatorData::from_slice(auth_data.as_bytes()).unwrap();
        assert_eq!(reparsed.attested_credential, Some(attested.clone()));
        assert_eq!(
            attested.public_key_spki(),
            Err(Error::Protocol(ProtocolError::UnsupportedPublicKey))
        );
    }
}
