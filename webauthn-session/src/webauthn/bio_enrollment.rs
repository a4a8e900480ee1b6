use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::negotiator::PinUvNegotiator;
use crate::ops::webauthn::UserVerificationRequirement;
use crate::proto::ctap2::{
    Ctap2, Ctap2BioEnrollmentRequest, Ctap2BioEnrollmentResponse, Ctap2LastEnrollmentSampleStatus,
};
use crate::session::events::{EventSink, UiEvent};
use crate::transport::Channel;
use crate::unwrap_field;
use crate::webauthn::error::{Error, PlatformError, ProtocolError};

/// Checks that the authenticator can enroll fingerprints, and obtains a bio-enrollment
/// token for the EnrollBegin command it returns.
pub(crate) async fn authorize_enrollment<C>(
    channel: &mut C,
    negotiator: &mut PinUvNegotiator<'_>,
) -> Result<Ctap2BioEnrollmentRequest, Error>
where
    C: Channel + ?Sized,
{
    if !negotiator.info().supports_bio_enrollment() {
        warn!("Authenticator does not support biometric enrollment");
        return Err(Error::Platform(PlatformError::NotSupported));
    }
    let mut begin = Ctap2BioEnrollmentRequest::new_start_new_enrollment(None);
    negotiator
        .negotiate(channel, UserVerificationRequirement::Required, &mut begin)
        .await?;
    Ok(begin)
}

/// Enrolls a new fingerprint, naming it `name` if given, and returns its template ID.
///
/// Samples are captured until the authenticator needs no more. Bad samples are simply
/// captured again; each one is reported through [`UiEvent::FingerprintEnrollment`].
#[instrument(skip_all, fields(name = ?name))]
pub(crate) async fn enroll_fingerprint<C>(
    channel: &mut C,
    negotiator: &PinUvNegotiator<'_>,
    begin: &Ctap2BioEnrollmentRequest,
    events: &EventSink,
    name: Option<&str>,
    timeout: Duration,
) -> Result<Vec<u8>, Error>
where
    C: Channel + ?Sized,
{
    events.emit(UiEvent::PresenceRequired);
    let response = channel.ctap2_bio_enrollment(begin, timeout).await?;
    let template_id = unwrap_field!(response.template_id.clone()).into_vec();
    let (mut status, mut remaining) = sample_feedback(&response, events)?;
    info!(remaining, "Enrollment started");

    while remaining > 0 {
        let mut capture = Ctap2BioEnrollmentRequest::new_next_enrollment(&template_id, None);
        negotiator.authorize_request(&mut capture)?;
        events.emit(UiEvent::PresenceRequired);
        let response = channel.ctap2_bio_enrollment(&capture, timeout).await?;
        (status, remaining) = sample_feedback(&response, events)?;
        debug!(?status, remaining, "Captured sample");
    }

    if status != Ctap2LastEnrollmentSampleStatus::Good {
        warn!(?status, "Enrollment finished on a bad sample");
        return Err(Error::Protocol(ProtocolError::UnexpectedEnrollmentStatus));
    }

    if let Some(name) = name {
        let mut rename = Ctap2BioEnrollmentRequest::new_rename_enrollment(&template_id, name);
        negotiator.authorize_request(&mut rename)?;
        channel.ctap2_bio_enrollment(&rename, timeout).await?;
        debug!("Enrollment renamed");
    }
    info!("Fingerprint enrolled");
    Ok(template_id)
}

fn sample_feedback(
    response: &Ctap2BioEnrollmentResponse,
    events: &EventSink,
) -> Result<(Ctap2LastEnrollmentSampleStatus, u32), Error> {
    let status = unwrap_field!(response.last_enroll_sample_status);
    let remaining = unwrap_field!(response.remaining_samples);
    let remaining = u32::try_from(remaining).unwrap_or(u32::MAX);
    events.emit(UiEvent::FingerprintEnrollment {
        remaining_samples: remaining,
        feedback: status,
    });
    Ok((status, remaining))
}

#[cfg(test)]
mod tests {
    use serde_bytes::ByteBuf;

    use super::*;
    use crate::pin::PinUvAuthProtocolOne;
    use crate::proto::ctap2::cbor::{to_vec, CborRequest, CborResponse};
    use crate::proto::ctap2::{Ctap2AuthTokenPermissionRole, Ctap2UserVerifiableRequest};
    use crate::session::prompt::Interaction;
    use crate::transport::mock::MockChannel;
    use crate::webauthn::negotiator::tests::{
        create_info, expect_key_agreement, expect_pin_retries, pin_token_request_for,
        token_response, TOKEN,
    };
    use crate::webauthn::CtapError;
    use test_log::test;

    const TIMEOUT: Duration = Duration::from_secs(1);
    const TEMPLATE: [u8; 2] = [0x0E, 0x01];

    fn signed(mut request: Ctap2BioEnrollmentRequest) -> CborRequest {
        request
            .calculate_and_set_uv_auth(&PinUvAuthProtocolOne::new(), &TOKEN)
            .unwrap();
        CborRequest::try_from(&request).unwrap()
    }

    fn sample(
        template_id: Option<&[u8]>,
        status: Ctap2LastEnrollmentSampleStatus,
        remaining: u64,
    ) -> CborResponse {
        let response = Ctap2BioEnrollmentResponse {
            template_id: template_id.map(ByteBuf::from),
            last_enroll_sample_status: Some(status),
            remaining_samples: Some(remaining),
            ..Default::default()
        };
        CborResponse::new_success_from_slice(&to_vec(&response).unwrap())
    }

    fn bio_channel() -> MockChannel {
        let channel = MockChannel::new();
        expect_key_agreement(&channel);
        expect_pin_retries(&channel, 8);
        channel.push_command_pair(
            pin_token_request_for("1234", Ctap2AuthTokenPermissionRole::BIO_ENROLLMENT, None),
            token_response(),
        );
        channel.push_command_pair(
            signed(Ctap2BioEnrollmentRequest::new_start_new_enrollment(None)),
            sample(Some(&TEMPLATE), Ctap2LastEnrollmentSampleStatus::Good, 2),
        );
        channel
    }

    async fn enroll(
        mut channel: MockChannel,
        options: &[(&str, bool)],
        name: Option<&str>,
    ) -> (Result<Vec<u8>, Error>, Vec<UiEvent>) {
        let info = create_info(options);
        let interaction = Interaction::new(EventSink::new(32));
        let mut events = interaction.events().subscribe();
        let mut prompts = interaction.events().subscribe();
        let mut history = Vec::new();
        let mut negotiator =
            PinUvNegotiator::new(&info, &interaction, &[1], TIMEOUT, TIMEOUT, &mut history);

        let answer = async {
            while let Ok(event) = prompts.recv().await {
                if matches!(event, UiEvent::PinRequired { .. }) {
                    interaction.send_pin("1234");
                }
            }
        };
        let ceremony = async {
            let begin = authorize_enrollment(&mut channel, &mut negotiator).await?;
            enroll_fingerprint(&mut channel, &negotiator, &begin, interaction.events(), name, TIMEOUT)
                .await
        };
        let result = tokio::select! {
            result = ceremony => result,
            _ = answer => unreachable!(),
        };
        assert_eq!(channel.pending_requests(), 0);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        (result, seen)
    }

    const BIO_OPTIONS: &[(&str, bool)] = &[
        ("clientPin", true),
        ("pinUvAuthToken", true),
        ("bioEnroll", false),
    ];

    #[test(tokio::test)]
    async fn bad_samples_are_captured_again() {
        let channel = bio_channel();
        channel.push_command_pair(
            signed(Ctap2BioEnrollmentRequest::new_next_enrollment(&TEMPLATE, None)),
            sample(None, Ctap2LastEnrollmentSampleStatus::TooFast, 2),
        );
        channel.push_command_pair(
            signed(Ctap2BioEnrollmentRequest::new_next_enrollment(&TEMPLATE, None)),
            sample(None, Ctap2LastEnrollmentSampleStatus::Good, 1),
        );
        channel.push_command_pair(
            signed(Ctap2BioEnrollmentRequest::new_next_enrollment(&TEMPLATE, None)),
            sample(None, Ctap2LastEnrollmentSampleStatus::Good, 0),
        );
        channel.push_command_pair(
            signed(Ctap2BioEnrollmentRequest::new_rename_enrollment(&TEMPLATE, "thumb")),
            CborResponse::new_success_from_slice(&[]),
        );

        let (result, events) = enroll(channel, BIO_OPTIONS, Some("thumb")).await;
        assert_eq!(result, Ok(TEMPLATE.to_vec()));

        let feedback: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                UiEvent::FingerprintEnrollment {
                    remaining_samples,
                    feedback,
                } => Some((*remaining_samples, feedback.code())),
                _ => None,
            })
            .collect();
        assert_eq!(feedback, vec![(2, 0x00), (2, 0x05), (1, 0x00), (0, 0x00)]);
        let touches = events
            .iter()
            .filter(|event| **event == UiEvent::PresenceRequired)
            .count();
        assert_eq!(touches, 4);
    }

    #[tokio::test]
    async fn enrollment_must_end_on_a_good_sample() {
        let channel = bio_channel();
        channel.push_command_pair(
            signed(Ctap2BioEnrollmentRequest::new_next_enrollment(&TEMPLATE, None)),
            sample(None, Ctap2LastEnrollmentSampleStatus::PoorQuality, 0),
        );

        let (result, _) = enroll(channel, BIO_OPTIONS, None).await;
        assert_eq!(
            result,
            Err(Error::Protocol(ProtocolError::UnexpectedEnrollmentStatus))
        );
    }

    #[tokio::test]
    async fn sensor_errors_are_terminal() {
        let channel = bio_channel();
        channel.push_command_pair(
            signed(Ctap2BioEnrollmentRequest::new_next_enrollment(&TEMPLATE, None)),
            CborResponse::new_error(CtapError::UserActionTimeout),
        );

        let (result, _) = enroll(channel, BIO_OPTIONS, None).await;
        assert_eq!(result, Err(Error::Ctap(CtapError::UserActionTimeout)));
    }

    #[tokio::test]
    async fn requires_bio_enrollment_support() {
        let (result, events) =
            enroll(MockChannel::new(), &[("clientPin", true)], None).await;
        assert_eq!(result, Err(Error::Platform(PlatformError::NotSupported)));
        assert!(events.is_empty());
    }
}
