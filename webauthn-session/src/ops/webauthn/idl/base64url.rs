use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Bytes carried as unpadded base64url text in WebAuthn JSON documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Base64UrlString(pub Vec<u8>);

impl From<Vec<u8>> for Base64UrlString {
    fn from(bytes: Vec<u8>) -> Self {
        Base64UrlString(bytes)
    }
}

impl From<&[u8]> for Base64UrlString {
    fn from(bytes: &[u8]) -> Self {
        Base64UrlString(bytes.to_vec())
    }
}

impl From<Base64UrlString> for Vec<u8> {
    fn from(b64: Base64UrlString) -> Vec<u8> {
        b64.0
    }
}

impl Deref for Base64UrlString {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Base64UrlString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64_url::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64UrlString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        // Tolerate padded input, some relying parties send it
        base64_url::decode(s.trim_end_matches('='))
            .map_err(serde::de::Error::custom)
            .map(Base64UrlString)
    }
}

impl Serialize for Base64UrlString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&base64_url::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::Base64UrlString;

    #[test]
    fn unpadded_and_padded_input() {
        let value: Base64UrlString = serde_json::from_str("\"AQID\"").unwrap();
        assert_eq!(value.0, vec![1, 2, 3]);
        let value: Base64UrlString = serde_json::from_str("\"AQ==\"").unwrap();
        assert_eq!(value.to_string(), "AQ");
        assert!(serde_json::from_str::<Base64UrlString>("\"*\"").is_err());
    }
}
