use std::time::Duration;

use serde_bytes::ByteBuf;
use serde_indexed::{DeserializeIndexed, SerializeIndexed};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::{
    Ctap2AuthTokenPermissionRole, Ctap2GetInfoResponse, Ctap2PinUvAuthProtocol,
    Ctap2UserVerifiableRequest,
};
use crate::pin::PinUvAuthProtocol;
use crate::proto::ctap2::cbor;
use crate::webauthn::error::Error;

#[derive(Debug, Clone, PartialEq, SerializeIndexed)]
pub struct Ctap2BioEnrollmentRequest {
    /// modality (0x01)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x01)]
    pub modality: Option<Ctap2BioEnrollmentModality>,

    /// subCommand (0x02)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x02)]
    pub subcommand: Option<Ctap2BioEnrollmentSubcommand>,

    /// subCommandParams (0x03)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x03)]
    pub subcommand_params: Option<Ctap2BioEnrollmentParams>,

    /// pinUvAuthProtocol (0x04)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x04)]
    pub protocol: Option<Ctap2PinUvAuthProtocol>,

    /// pinUvAuthParam (0x05)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x05)]
    pub uv_auth_param: Option<ByteBuf>,

    /// getModality (0x06)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x06)]
    pub get_modality: Option<bool>,
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
pub enum Ctap2BioEnrollmentSubcommand {
    EnrollBegin = 0x01,
    EnrollCaptureNextSample = 0x02,
    CancelCurrentEnrollment = 0x03,
    EnumerateEnrollments = 0x04,
    SetFriendlyName = 0x05,
    RemoveEnrollment = 0x06,
    GetFingerprintSensorInfo = 0x07,
}

#[derive(Debug, Clone, PartialEq, SerializeIndexed)]
pub struct Ctap2BioEnrollmentParams {
    /// templateId (0x01)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x01)]
    pub template_id: Option<ByteBuf>,

    /// templateFriendlyName (0x02)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x02)]
    pub template_friendly_name: Option<String>,

    /// timeoutMilliseconds (0x03)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x03)]
    pub timeout_milliseconds: Option<u64>,
}

#[derive(Debug, Default, Clone, PartialEq, SerializeIndexed, DeserializeIndexed)]
pub struct Ctap2BioEnrollmentResponse {
    /// modality (0x01)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x01)]
    pub modality: Option<Ctap2BioEnrollmentModality>,

    /// fingerprintKind (0x02)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x02)]
    pub fingerprint_kind: Option<Ctap2BioEnrollmentFingerprintKind>,

    /// maxCaptureSamplesRequiredForEnroll (0x03)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x03)]
    pub max_capture_samples_required_for_enroll: Option<u64>,

    /// templateId (0x04)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x04)]
    pub template_id: Option<ByteBuf>,

    /// lastEnrollSampleStatus (0x05)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x05)]
    pub last_enroll_sample_status: Option<Ctap2LastEnrollmentSampleStatus>,

    /// remainingSamples (0x06)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x06)]
    pub remaining_samples: Option<u64>,

    /// templateInfos (0x07)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x07)]
    pub template_infos: Option<Vec<Ctap2BioEnrollmentTemplateId>>,

    /// maxTemplateFriendlyName (0x08)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x08)]
    pub max_template_friendly_name: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, SerializeIndexed, DeserializeIndexed)]
pub struct Ctap2BioEnrollmentTemplateId {
    /// templateId (0x01)
    #[serde(index = 0x01)]
    pub template_id: ByteBuf,

    /// templateFriendlyName (0x02)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(index = 0x02)]
    pub template_friendly_name: Option<String>,
}

/// Feedback the sensor gives about the last captured sample.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
pub enum Ctap2LastEnrollmentSampleStatus {
    Good = 0x00,
    TooHigh = 0x01,
    TooLow = 0x02,
    TooLeft = 0x03,
    TooRight = 0x04,
    TooFast = 0x05,
    TooSlow = 0x06,
    PoorQuality = 0x07,
    TooSkewed = 0x08,
    TooShort = 0x09,
    MergeFailure = 0x0A,
    Exists = 0x0B,
    Unused = 0x0C,
    NoUserActivity = 0x0D,
    NoUserPresenceTransition = 0x0E,
}

impl Ctap2LastEnrollmentSampleStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
pub enum Ctap2BioEnrollmentModality {
    Fingerprint = 0x01,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
pub enum Ctap2BioEnrollmentFingerprintKind {
    Touch = 0x01,
    Swipe = 0x02,
}

impl Ctap2BioEnrollmentRequest {
    fn new_fingerprint(
        subcommand: Ctap2BioEnrollmentSubcommand,
        subcommand_params: Option<Ctap2BioEnrollmentParams>,
    ) -> Self {
        Ctap2BioEnrollmentRequest {
            modality: Some(Ctap2BioEnrollmentModality::Fingerprint),
            subcommand: Some(subcommand),
            subcommand_params,
            protocol: None,
            uv_auth_param: None,
            get_modality: None,
        }
    }

    pub fn new_get_modality() -> Self {
        Ctap2BioEnrollmentRequest {
            modality: None,
            subcommand: None,
            subcommand_params: None,
            protocol: None,
            uv_auth_param: None,
            get_modality: Some(true),
        }
    }

    pub fn new_fingerprint_sensor_info() -> Self {
        Self::new_fingerprint(Ctap2BioEnrollmentSubcommand::GetFingerprintSensorInfo, None)
    }

    pub fn new_start_new_enrollment(enrollment_timeout: Option<Duration>) -> Self {
        let subcommand_params = enrollment_timeout.map(|time| Ctap2BioEnrollmentParams {
            template_id: None,
            template_friendly_name: None,
            timeout_milliseconds: Some(time.as_millis() as u64),
        });
        Self::new_fingerprint(Ctap2BioEnrollmentSubcommand::EnrollBegin, subcommand_params)
    }

    pub fn new_next_enrollment(template_id: &[u8], enrollment_timeout: Option<Duration>) -> Self {
        let subcommand_params = Some(Ctap2BioEnrollmentParams {
            template_id: Some(ByteBuf::from(template_id)),
            template_friendly_name: None,
            timeout_milliseconds: enrollment_timeout.map(|x| x.as_millis() as u64),
        });
        Self::new_fingerprint(
            Ctap2BioEnrollmentSubcommand::EnrollCaptureNextSample,
            subcommand_params,
        )
    }

    pub fn new_rename_enrollment(template_id: &[u8], template_friendly_name: &str) -> Self {
        let subcommand_params = Some(Ctap2BioEnrollmentParams {
            template_id: Some(ByteBuf::from(template_id)),
            template_friendly_name: Some(template_friendly_name.to_string()),
            timeout_milliseconds: None,
        });
        Self::new_fingerprint(Ctap2BioEnrollmentSubcommand::SetFriendlyName, subcommand_params)
    }

    pub fn new_cancel_current_enrollment() -> Self {
        Self::new_fingerprint(Ctap2BioEnrollmentSubcommand::CancelCurrentEnrollment, None)
    }
}

impl Ctap2UserVerifiableRequest for Ctap2BioEnrollmentRequest {
    fn ensure_uv_set(&mut self) {
        // No-op
    }

    fn calculate_and_set_uv_auth(
        &mut self,
        uv_proto: &dyn PinUvAuthProtocol,
        uv_auth_token: &[u8],
    ) -> Result<(), Error> {
        // pinUvAuthParam = authenticate(token, modality || subCommand || subCommandParams)
        let mut data = vec![
            Ctap2BioEnrollmentModality::Fingerprint as u8,
            self.subcommand.map(|x| x as u8).unwrap_or_default(),
        ];
        if let Some(params) = &self.subcommand_params {
            data.extend(cbor::to_vec(params)?);
        }
        let uv_auth_param = uv_proto.authenticate(uv_auth_token, &data)?;
        self.protocol = Some(uv_proto.version());
        self.uv_auth_param = Some(ByteBuf::from(uv_auth_param));
        Ok(())
    }

    fn client_data_hash(&self) -> &[u8] {
        &[]
    }

    fn permissions(&self) -> Ctap2AuthTokenPermissionRole {
        Ctap2AuthTokenPermissionRole::BIO_ENROLLMENT
    }

    fn permissions_rpid(&self) -> Option<&str> {
        None
    }

    fn can_use_uv(&self, info: &Ctap2GetInfoResponse) -> bool {
        info.option_enabled("uvBioEnroll")
    }
}
