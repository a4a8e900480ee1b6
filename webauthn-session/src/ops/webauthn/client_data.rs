use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;
use url::Url;

use crate::ops::webauthn::Operation;
use crate::webauthn::error::{Error, PlatformError};

/// The caller's web origin. A bare host such as `example.com` stands for
/// `https://example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    serialized: String,
    host: String,
}

impl Origin {
    pub fn parse(origin: &str) -> Result<Self, Error> {
        let invalid = || Error::Platform(PlatformError::InvalidOrigin(origin.to_owned()));
        let origin = origin.trim();
        if origin.is_empty() {
            return Err(invalid());
        }
        let url = if origin.contains("://") {
            Url::parse(origin)
        } else {
            Url::parse(&format!("https://{origin}"))
        }
        .map_err(|err| {
            warn!(%origin, ?err, "Unparseable origin");
            invalid()
        })?;

        let host = url.host_str().ok_or_else(invalid)?.to_ascii_lowercase();
        match url.scheme() {
            "https" => (),
            // Plain HTTP is only acceptable for local development
            "http" if host == "localhost" || host.ends_with(".localhost") => (),
            scheme => {
                warn!(%scheme, "Origin scheme is not allowed");
                return Err(invalid());
            }
        }

        Ok(Self {
            serialized: url.origin().ascii_serialization(),
            host,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Whether `rp_id` is this origin's host, or one of its parent domains.
    pub fn is_valid_rp_id(&self, rp_id: &str) -> bool {
        let rp_id = rp_id.to_ascii_lowercase();
        if rp_id.is_empty() {
            return false;
        }
        self.host == rp_id
            || (self.host.ends_with(&rp_id)
                && self.host[..self.host.len() - rp_id.len()].ends_with('.')
                && rp_id.contains('.'))
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialized)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientData {
    pub operation: Operation,
    pub challenge: Vec<u8>,
    pub origin: String,
    pub cross_origin: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CollectedClientData<'a> {
    r#type: &'static str,
    challenge: String,
    origin: &'a str,
    cross_origin: bool,
}

impl ClientData {
    pub fn new(operation: Operation, challenge: &[u8], origin: &Origin) -> Self {
        Self {
            operation,
            challenge: challenge.to_vec(),
            origin: origin.as_str().to_owned(),
            cross_origin: None,
        }
    }

    /// The `clientDataJSON` bytes handed to the relying party.
    pub fn to_json(&self) -> Result<String, Error> {
        let collected = CollectedClientData {
            r#type: match &self.operation {
                Operation::MakeCredential => "webauthn.create",
                Operation::GetAssertion => "webauthn.get",
            },
            challenge: base64_url::encode(&self.challenge),
            origin: &self.origin,
            cross_origin: self.cross_origin.unwrap_or(false),
        };
        serde_json::to_string(&collected)
            .map_err(|err| Error::Platform(PlatformError::InvalidOptions(err.to_string())))
    }

    pub fn hash(&self) -> Result<Vec<u8>, Error> {
        Ok(Self::hash_json(&self.to_json()?))
    }

    pub fn hash_json(client_data_json: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(client_data_json.as_bytes());
        hasher.finalize().to_vec()
    }
}
