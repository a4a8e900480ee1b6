use crate::proto::CtapError;
use crate::webauthn::error::{Error, ProtocolError};

/// A decoded response frame: the status byte followed by optional CBOR data.
#[derive(Debug, Clone, PartialEq)]
pub struct CborResponse {
    pub status_code: CtapError,
    pub data: Option<Vec<u8>>,
}

impl CborResponse {
    pub fn new_success_from_slice(slice: &[u8]) -> Self {
        Self {
            status_code: CtapError::Ok,
            data: match slice.len() {
                0 => None,
                _ => Some(Vec::from(slice)),
            },
        }
    }

    pub fn new_error(status_code: CtapError) -> Self {
        Self {
            status_code,
            data: None,
        }
    }

    pub fn to_frame(&self) -> Vec<u8> {
        let mut frame = vec![self.status_code.code()];
        if let Some(data) = &self.data {
            frame.extend(data);
        }
        frame
    }
}

impl TryFrom<&[u8]> for CborResponse {
    type Error = Error;
    fn try_from(packet: &[u8]) -> Result<Self, Self::Error> {
        let Some((status, data)) = packet.split_first() else {
            return Err(ProtocolError::EmptyFrame.into());
        };
        Ok(CborResponse {
            status_code: CtapError::from(*status),
            data: match data.len() {
                0 => None,
                _ => Some(Vec::from(data)),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_success_frame() {
        let response = CborResponse::try_from([0x00, 0xA0].as_slice()).unwrap();
        assert_eq!(response.status_code, CtapError::Ok);
        assert_eq!(response.data, Some(vec![0xA0]));
    }

    #[test]
    fn parse_status_only_frame() {
        let response = CborResponse::try_from([0x31].as_slice()).unwrap();
        assert_eq!(response.status_code, CtapError::PINInvalid);
        assert_eq!(response.data, None);
    }

    #[test]
    fn unknown_status_is_not_rejected() {
        let response = CborResponse::try_from([0xDD].as_slice()).unwrap();
        assert_eq!(response.status_code, CtapError::Unknown(0xDD));
        assert_eq!(response.to_frame(), vec![0xDD]);
    }

    #[test]
    fn empty_frame_is_a_protocol_error() {
        let err = CborResponse::try_from([].as_slice()).unwrap_err();
        assert_eq!(err, Error::Protocol(ProtocolError::EmptyFrame));
    }
}
