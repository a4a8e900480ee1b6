use std::ops::Deref;

use tracing::warn;

use crate::ops::webauthn::Origin;
use crate::webauthn::error::{Error, PlatformError};

/// A relying party ID that was checked against the caller's origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelyingPartyId(String);

impl RelyingPartyId {
    /// Uses `requested` when given, the origin's host otherwise. The result must be the
    /// origin's host or one of its parent domains.
    pub fn for_origin(origin: &Origin, requested: Option<&str>) -> Result<Self, Error> {
        let Some(requested) = requested else {
            return Ok(Self(origin.host().to_owned()));
        };
        if !origin.is_valid_rp_id(requested) {
            warn!(%origin, rp_id = requested, "Relying party ID does not match origin");
            return Err(Error::Platform(PlatformError::RelyingPartyMismatch(
                requested.to_owned(),
            )));
        }
        Ok(Self(requested.to_ascii_lowercase()))
    }
}

impl Deref for RelyingPartyId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<RelyingPartyId> for String {
    fn from(rpid: RelyingPartyId) -> String {
        rpid.0
    }
}

impl TryFrom<&str> for RelyingPartyId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "" => Err(Error::Platform(PlatformError::InvalidOptions(
                "empty relying party id".into(),
            ))),
            _ => Ok(RelyingPartyId(value.to_ascii_lowercase())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_origin_host() {
        let origin = Origin::parse("https://login.example.com").unwrap();
        let rp_id = RelyingPartyId::for_origin(&origin, None).unwrap();
        assert_eq!(&*rp_id, "login.example.com");
        let rp_id = RelyingPartyId::for_origin(&origin, Some("example.com")).unwrap();
        assert_eq!(&*rp_id, "example.com");
    }

    #[test]
    fn rejects_foreign_rp_id() {
        let origin = Origin::parse("example.com").unwrap();
        assert_eq!(
            RelyingPartyId::for_origin(&origin, Some("evil.com")),
            Err(Error::Platform(PlatformError::RelyingPartyMismatch(
                "evil.com".into()
            )))
        );
        assert!(RelyingPartyId::try_from("").is_err());
    }
}
