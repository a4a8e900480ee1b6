use crate::proto::ctap2::model::{
    Ctap2BioEnrollmentRequest, Ctap2ClientPinRequest, Ctap2CommandCode, Ctap2GetAssertionRequest,
    Ctap2MakeCredentialRequest,
};

use super::serde::{to_vec, CborError};

/// A CTAP2 command ready to be framed: the command byte followed by its CBOR parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CborRequest {
    pub command: Ctap2CommandCode,
    pub encoded_data: Vec<u8>,
}

impl CborRequest {
    pub fn new(command: Ctap2CommandCode) -> Self {
        Self {
            command,
            encoded_data: vec![],
        }
    }

    pub fn to_frame(&self) -> Vec<u8> {
        let mut data = vec![self.command as u8];
        data.extend(&self.encoded_data);
        data
    }
}

macro_rules! impl_cbor_request {
    ($request: ty, $command: expr) => {
        impl TryFrom<&$request> for CborRequest {
            type Error = CborError;
            fn try_from(request: &$request) -> Result<CborRequest, CborError> {
                Ok(CborRequest {
                    command: $command,
                    encoded_data: to_vec(request)?,
                })
            }
        }
    };
}

impl_cbor_request!(
    Ctap2MakeCredentialRequest,
    Ctap2CommandCode::AuthenticatorMakeCredential
);
impl_cbor_request!(
    Ctap2GetAssertionRequest,
    Ctap2CommandCode::AuthenticatorGetAssertion
);
impl_cbor_request!(Ctap2ClientPinRequest, Ctap2CommandCode::AuthenticatorClientPin);
impl_cbor_request!(
    Ctap2BioEnrollmentRequest,
    Ctap2CommandCode::AuthenticatorBioEnrollment
);
