pub mod cbor;

mod model;
mod protocol;

pub use model::{
    Ctap2AuthTokenPermissionRole, Ctap2BioEnrollmentFingerprintKind, Ctap2BioEnrollmentModality,
    Ctap2BioEnrollmentParams, Ctap2BioEnrollmentRequest, Ctap2BioEnrollmentResponse,
    Ctap2BioEnrollmentSubcommand, Ctap2BioEnrollmentTemplateId, Ctap2COSEAlgorithmIdentifier,
    Ctap2ClientPinRequest, Ctap2ClientPinResponse, Ctap2CommandCode, Ctap2CredentialType,
    Ctap2GetAssertionOptions, Ctap2GetAssertionRequest, Ctap2GetAssertionResponse,
    Ctap2GetInfoResponse, Ctap2LastEnrollmentSampleStatus, Ctap2MakeCredentialOptions,
    Ctap2MakeCredentialRequest, Ctap2MakeCredentialResponse, Ctap2PinUvAuthProtocol,
    Ctap2PinUvAuthProtocolCommand, Ctap2PublicKeyCredentialDescriptor,
    Ctap2PublicKeyCredentialRpEntity, Ctap2PublicKeyCredentialType,
    Ctap2PublicKeyCredentialUserEntity, Ctap2UserVerifiableRequest,
    Ctap2UserVerificationOperation,
};
pub use protocol::{Ctap2, Ctap2Reply, UnknownFields};
