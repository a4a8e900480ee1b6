use std::collections::BTreeMap;
use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, trace, warn};

use crate::proto::ctap2::cbor::{self, CborRequest, CborResponse, Value};
use crate::proto::ctap2::{
    Ctap2BioEnrollmentRequest, Ctap2BioEnrollmentResponse, Ctap2ClientPinRequest,
    Ctap2ClientPinResponse, Ctap2CommandCode, Ctap2GetAssertionRequest, Ctap2GetAssertionResponse,
    Ctap2GetInfoResponse, Ctap2MakeCredentialRequest, Ctap2MakeCredentialResponse,
};
use crate::proto::CtapError;
use crate::transport::error::TransportError;
use crate::transport::Channel;
use crate::unwrap_field;
use crate::webauthn::error::Error;

/// Response map entries this crate does not interpret.
pub type UnknownFields = BTreeMap<Value, Value>;

/// A decoded response, with whatever the authenticator sent beyond the known fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Ctap2Reply<T> {
    pub body: T,
    pub unknown_fields: UnknownFields,
}

impl<T> Deref for Ctap2Reply<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.body
    }
}

impl<T: DeserializeOwned> Ctap2Reply<T> {
    fn decode(data: &[u8], known_fields: &[i128]) -> Result<Self, Error> {
        let body: T = cbor::from_slice(data)?;
        let map: UnknownFields = cbor::from_slice(data)?;
        let unknown_fields = map
            .into_iter()
            .filter(|(key, _)| !matches!(key, Value::Integer(i) if known_fields.contains(i)))
            .collect::<UnknownFields>();
        if !unknown_fields.is_empty() {
            debug!(count = unknown_fields.len(), "Keeping unknown response fields");
        }
        Ok(Self {
            body,
            unknown_fields,
        })
    }
}

/// CTAP2 commands over any [`Channel`].
///
/// Any non-zero status byte is returned as [`Error::Ctap`] carrying the status unchanged.
#[async_trait]
pub trait Ctap2 {
    async fn ctap2_get_info(
        &mut self,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2GetInfoResponse>, Error>;
    async fn ctap2_make_credential(
        &mut self,
        request: &Ctap2MakeCredentialRequest,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2MakeCredentialResponse>, Error>;
    async fn ctap2_get_assertion(
        &mut self,
        request: &Ctap2GetAssertionRequest,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2GetAssertionResponse>, Error>;
    async fn ctap2_get_next_assertion(
        &mut self,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2GetAssertionResponse>, Error>;
    async fn ctap2_selection(&mut self, timeout: Duration) -> Result<(), Error>;
    async fn ctap2_client_pin(
        &mut self,
        request: &Ctap2ClientPinRequest,
        timeout: Duration,
    ) -> Result<Ctap2ClientPinResponse, Error>;
    async fn ctap2_bio_enrollment(
        &mut self,
        request: &Ctap2BioEnrollmentRequest,
        timeout: Duration,
    ) -> Result<Ctap2BioEnrollmentResponse, Error>;
}

async fn send_command<C>(
    channel: &mut C,
    request: &CborRequest,
    timeout: Duration,
) -> Result<CborResponse, Error>
where
    C: Channel + ?Sized,
{
    trace!(command = ?request.command, len = request.encoded_data.len(), "Sending CTAP2 command");
    channel.cbor_send(request, timeout).await?;
    let response = match tokio::time::timeout(timeout, channel.cbor_recv(timeout)).await {
        Ok(response) => response?,
        Err(_) => {
            warn!(command = ?request.command, "No response before timeout");
            return Err(Error::Transport(TransportError::Timeout));
        }
    };
    match response.status_code {
        CtapError::Ok => Ok(response),
        status => {
            debug!(command = ?request.command, ?status, "CTAP2 command failed");
            Err(Error::Ctap(status))
        }
    }
}

#[async_trait]
impl<C> Ctap2 for C
where
    C: Channel + ?Sized,
{
    #[instrument(skip_all)]
    async fn ctap2_get_info(
        &mut self,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2GetInfoResponse>, Error> {
        let cbor_request = CborRequest::new(Ctap2CommandCode::AuthenticatorGetInfo);
        let cbor_response = send_command(self, &cbor_request, timeout).await?;
        let data = unwrap_field!(cbor_response.data);
        let ctap_response: Ctap2Reply<Ctap2GetInfoResponse> =
            Ctap2Reply::decode(&data, Ctap2GetInfoResponse::KNOWN_FIELDS)?;
        info!(versions = ?ctap_response.versions, options = ?ctap_response.options, "CTAP2 GetInfo response");
        Ok(ctap_response)
    }

    #[instrument(skip_all)]
    async fn ctap2_make_credential(
        &mut self,
        request: &Ctap2MakeCredentialRequest,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2MakeCredentialResponse>, Error> {
        trace!(?request);
        let cbor_request = CborRequest::try_from(request)?;
        let cbor_response = send_command(self, &cbor_request, timeout).await?;
        let data = unwrap_field!(cbor_response.data);
        let ctap_response: Ctap2Reply<Ctap2MakeCredentialResponse> =
            Ctap2Reply::decode(&data, Ctap2MakeCredentialResponse::KNOWN_FIELDS)?;
        debug!(format = %ctap_response.format, "CTAP2 MakeCredential response");
        Ok(ctap_response)
    }

    #[instrument(skip_all)]
    async fn ctap2_get_assertion(
        &mut self,
        request: &Ctap2GetAssertionRequest,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2GetAssertionResponse>, Error> {
        trace!(?request);
        let cbor_request = CborRequest::try_from(request)?;
        let cbor_response = send_command(self, &cbor_request, timeout).await?;
        let data = unwrap_field!(cbor_response.data);
        let ctap_response: Ctap2Reply<Ctap2GetAssertionResponse> =
            Ctap2Reply::decode(&data, Ctap2GetAssertionResponse::KNOWN_FIELDS)?;
        debug!(
            credentials_count = ?ctap_response.credentials_count,
            "CTAP2 GetAssertion response"
        );
        Ok(ctap_response)
    }

    #[instrument(skip_all)]
    async fn ctap2_get_next_assertion(
        &mut self,
        timeout: Duration,
    ) -> Result<Ctap2Reply<Ctap2GetAssertionResponse>, Error> {
        let cbor_request = CborRequest::new(Ctap2CommandCode::AuthenticatorGetNextAssertion);
        let cbor_response = send_command(self, &cbor_request, timeout).await?;
        let data = unwrap_field!(cbor_response.data);
        let ctap_response: Ctap2Reply<Ctap2GetAssertionResponse> =
            Ctap2Reply::decode(&data, Ctap2GetAssertionResponse::KNOWN_FIELDS)?;
        debug!("CTAP2 GetNextAssertion response");
        Ok(ctap_response)
    }

    #[instrument(skip_all)]
    async fn ctap2_selection(&mut self, timeout: Duration) -> Result<(), Error> {
        debug!("CTAP2 Authenticator Selection request");
        let cbor_request = CborRequest::new(Ctap2CommandCode::AuthenticatorSelection);
        send_command(self, &cbor_request, timeout).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(command = ?request.command))]
    async fn ctap2_client_pin(
        &mut self,
        request: &Ctap2ClientPinRequest,
        timeout: Duration,
    ) -> Result<Ctap2ClientPinResponse, Error> {
        let cbor_request = CborRequest::try_from(request)?;
        let cbor_response = send_command(self, &cbor_request, timeout).await?;
        let ctap_response = match cbor_response.data {
            Some(data) => cbor::from_slice(&data)?,
            None => Ctap2ClientPinResponse::default(),
        };
        debug!(
            pin_retries = ?ctap_response.pin_retries,
            uv_retries = ?ctap_response.uv_retries,
            "CTAP2 ClientPin response"
        );
        Ok(ctap_response)
    }

    #[instrument(skip_all, fields(subcommand = ?request.subcommand))]
    async fn ctap2_bio_enrollment(
        &mut self,
        request: &Ctap2BioEnrollmentRequest,
        timeout: Duration,
    ) -> Result<Ctap2BioEnrollmentResponse, Error> {
        let cbor_request = CborRequest::try_from(request)?;
        let cbor_response = send_command(self, &cbor_request, timeout).await?;
        let ctap_response = match cbor_response.data {
            Some(data) => cbor::from_slice(&data)?,
            None => Ctap2BioEnrollmentResponse::default(),
        };
        debug!(
            remaining_samples = ?ctap_response.remaining_samples,
            status = ?ctap_response.last_enroll_sample_status,
            "CTAP2 BioEnrollment response"
        );
        Ok(ctap_response)
    }
}
