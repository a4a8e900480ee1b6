use std::io::Cursor;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_cbor_2 as serde_cbor;

#[derive(thiserror::Error, Debug)]
#[error("CBOR error: {0}")]
pub struct CborError(#[from] serde_cbor::Error);

/// Compares by message, the underlying error carries no equality.
impl PartialEq for CborError {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_string() == other.0.to_string()
    }
}

pub(crate) type Value = serde_cbor::Value;

pub(crate) fn to_vec<T>(serializable: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    serde_cbor::ser::to_vec(serializable).map_err(CborError::from)
}

pub(crate) fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: DeserializeOwned,
{
    serde_cbor::de::from_slice(slice).map_err(CborError::from)
}

/// Decodes one CBOR item at the cursor position, leaving the cursor right after it.
/// Unlike [`from_slice`], trailing bytes are left for the caller.
pub(crate) fn from_cursor<T>(cursor: &mut Cursor<&[u8]>) -> Result<T, CborError>
where
    T: DeserializeOwned,
{
    let start = cursor.position() as usize;
    let remaining = cursor.get_ref().get(start..).unwrap_or(&[]);
    let mut deserializer = serde_cbor::Deserializer::from_slice(remaining);
    let value = T::deserialize(&mut deserializer)?;
    cursor.set_position((start + deserializer.byte_offset()) as u64);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_indexed::{DeserializeIndexed, SerializeIndexed};

    use super::*;

    #[derive(Debug, PartialEq, SerializeIndexed, DeserializeIndexed)]
    struct Reply {
        #[serde(index = 0x01)]
        pub status: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        #[serde(index = 0x02)]
        pub retries: Option<u8>,
    }

    #[test]
    fn integer_keys_and_skipped_members() {
        let encoded = to_vec(&Reply { status: 1, retries: None }).unwrap();
        assert_eq!(encoded, [0xA1, 0x01, 0x01]);
        let decoded: Reply = from_slice(&[0xA2, 0x01, 0x01, 0x02, 0x03]).unwrap();
        assert_eq!(decoded, Reply { status: 1, retries: Some(3) });
    }

    #[test]
    fn members_from_newer_firmware_are_ignored() {
        let map = BTreeMap::from([(1, 10u8), (2, 20u8), (0x30, 99u8)]);
        let decoded: Reply = from_slice(&to_vec(&map).unwrap()).unwrap();
        assert_eq!(decoded, Reply { status: 10, retries: Some(20) });
    }

    #[test]
    fn truncated_input_is_an_error() {
        assert!(from_slice::<Reply>(&[0xA2, 0x01]).is_err());
    }

    #[test]
    fn from_cursor_stops_after_item() {
        let mut bytes = to_vec(&Reply { status: 1, retries: Some(2) }).unwrap();
        let item_len = bytes.len();
        bytes.extend_from_slice(&[0xA0, 0xFF]);

        let mut cursor = Cursor::new(bytes.as_slice());
        let result: Reply = from_cursor(&mut cursor).unwrap();
        assert_eq!(result, Reply { status: 1, retries: Some(2) });
        assert_eq!(cursor.position() as usize, item_len);

        let empty: BTreeMap<u8, u8> = from_cursor(&mut cursor).unwrap();
        assert!(empty.is_empty());
        assert_eq!(cursor.position() as usize, item_len + 1);
    }
}
