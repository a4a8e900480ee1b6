use std::fmt;
use std::time::Duration;

use cosey::PublicKey;
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use crate::ops::webauthn::UserVerificationRequirement;
use crate::pin::{check_pin_policy, pin_hash, PinUvAuthProtocol};
use crate::proto::ctap2::{
    Ctap2, Ctap2ClientPinRequest, Ctap2ClientPinResponse, Ctap2GetInfoResponse,
    Ctap2PinUvAuthProtocol, Ctap2UserVerifiableRequest, Ctap2UserVerificationOperation,
};
use crate::session::events::UiEvent;
use crate::session::prompt::Interaction;
use crate::transport::Channel;
use crate::webauthn::error::{CtapError, Error, ErrorKind, PlatformError, ProtocolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatorState {
    Idle,
    KeyAgreement,
    AwaitingPin,
    Verifying,
    Authorized,
    Blocked,
    Failed(ErrorKind),
}

impl NegotiatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiatorState::Authorized | NegotiatorState::Blocked | NegotiatorState::Failed(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsedPinUvAuthToken {
    NewlyCalculated(Ctap2UserVerificationOperation),
    LegacyUV,
    None,
}

/// Key agreement with one authenticator, and the pinUvAuthToken obtained through it.
/// Secrets are wiped on drop.
pub struct PinProtocolState {
    protocol: Box<dyn PinUvAuthProtocol>,
    platform_key: PublicKey,
    shared_secret: Zeroizing<Vec<u8>>,
    token: Option<Zeroizing<Vec<u8>>>,
    pub pin_retries: Option<u32>,
    pub uv_retries: Option<u32>,
}

impl fmt::Debug for PinProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinProtocolState")
            .field("protocol", &self.protocol.version())
            .field("has_token", &self.token.is_some())
            .field("pin_retries", &self.pin_retries)
            .field("uv_retries", &self.uv_retries)
            .finish()
    }
}

impl PinProtocolState {
    fn establish(version: Ctap2PinUvAuthProtocol, peer: &PublicKey) -> Result<Self, Error> {
        let protocol = version.create_protocol_object();
        let (platform_key, shared_secret) = protocol.encapsulate(peer)?;
        Ok(Self {
            protocol,
            platform_key,
            shared_secret: Zeroizing::new(shared_secret),
            token: None,
            pin_retries: None,
            uv_retries: None,
        })
    }

    fn rekey(&mut self, peer: &PublicKey) -> Result<(), Error> {
        let (platform_key, shared_secret) = self.protocol.encapsulate(peer)?;
        self.platform_key = platform_key;
        self.shared_secret = Zeroizing::new(shared_secret);
        Ok(())
    }

    fn store_token(&mut self, response: Ctap2ClientPinResponse) -> Result<(), Error> {
        let Some(encrypted) = response.pin_uv_auth_token else {
            error!("Authenticator did not return a pinUvAuthToken");
            return Err(Error::Protocol(ProtocolError::MissingField("pinUvAuthToken")));
        };
        let token = self.protocol.decrypt(&self.shared_secret, &encrypted)?;
        self.token = Some(Zeroizing::new(token));
        Ok(())
    }

    pub fn version(&self) -> Ctap2PinUvAuthProtocol {
        self.protocol.version()
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

/// Authenticators must never report more retries than before. Keep the lower count if one does.
fn clamp_retries(previous: Option<u32>, reported: Option<u32>) -> Option<u32> {
    match (previous, reported) {
        (Some(previous), Some(reported)) if reported > previous => {
            warn!(previous, reported, "Authenticator reported more retries than before");
            Some(previous)
        }
        (_, reported) => reported,
    }
}

/// Obtains a pinUvAuthToken for one request, prompting the user through the session
/// as needed. Every transition is appended to the session's negotiator history.
pub struct PinUvNegotiator<'a> {
    info: &'a Ctap2GetInfoResponse,
    interaction: &'a Interaction,
    protocols: Vec<Ctap2PinUvAuthProtocol>,
    timeout: Duration,
    uv_timeout: Duration,
    history: &'a mut Vec<NegotiatorState>,
    authorized: Option<PinProtocolState>,
}

impl<'a> PinUvNegotiator<'a> {
    /// `timeout` bounds the ClientPIN bookkeeping commands, `uv_timeout` the ones
    /// waiting on built-in user verification.
    pub(crate) fn new(
        info: &'a Ctap2GetInfoResponse,
        interaction: &'a Interaction,
        preferred_protocols: &[u32],
        timeout: Duration,
        uv_timeout: Duration,
        history: &'a mut Vec<NegotiatorState>,
    ) -> Self {
        history.push(NegotiatorState::Idle);
        Self {
            info,
            interaction,
            protocols: info.pin_uv_auth_protocols(preferred_protocols),
            timeout,
            uv_timeout,
            history,
            authorized: None,
        }
    }

    pub fn state(&self) -> NegotiatorState {
        self.history
            .last()
            .copied()
            .unwrap_or(NegotiatorState::Idle)
    }

    pub fn info(&self) -> &Ctap2GetInfoResponse {
        self.info
    }

    pub fn protocol_state(&self) -> Option<&PinProtocolState> {
        self.authorized.as_ref()
    }

    fn transition(&mut self, next: NegotiatorState) {
        let current = self.state();
        if current != next {
            debug!(from = ?current, to = ?next, "Negotiator transition");
            self.history.push(next);
        }
    }

    /// Establishes user verification for `request` and signs it. Returns
    /// [`UsedPinUvAuthToken::None`] when the request goes out without it.
    #[instrument(skip_all, fields(?user_verification))]
    pub async fn negotiate<C, R>(
        &mut self,
        channel: &mut C,
        user_verification: UserVerificationRequirement,
        request: &mut R,
    ) -> Result<UsedPinUvAuthToken, Error>
    where
        C: Channel + ?Sized,
        R: Ctap2UserVerifiableRequest,
    {
        let result = self.run(channel, user_verification, request).await;
        if let Err(err) = &result {
            if self.state() != NegotiatorState::Blocked {
                warn!(?err, "PIN/UV negotiation failed");
                self.transition(NegotiatorState::Failed(err.kind()));
            }
        }
        result
    }

    async fn run<C, R>(
        &mut self,
        channel: &mut C,
        user_verification: UserVerificationRequirement,
        request: &mut R,
    ) -> Result<UsedPinUvAuthToken, Error>
    where
        C: Channel + ?Sized,
        R: Ctap2UserVerifiableRequest,
    {
        if !self.uv_wanted(user_verification)? {
            debug!("Proceeding without user verification");
            return Ok(UsedPinUvAuthToken::None);
        }

        let skip_uv = !request.can_use_uv(self.info);
        let mut uv_blocked = false;
        loop {
            let operation = self.info.uv_operation(uv_blocked || skip_uv);
            match operation {
                Some(Ctap2UserVerificationOperation::LegacyUv) => {
                    request.ensure_uv_set();
                    self.transition(NegotiatorState::Authorized);
                    return Ok(UsedPinUvAuthToken::LegacyUV);
                }
                Some(
                    operation @ Ctap2UserVerificationOperation::GetPinUvAuthTokenUsingUvWithPermissions,
                ) => {
                    if self.verify_with_uv(channel, request).await? {
                        self.authorize_request(request)?;
                        return Ok(UsedPinUvAuthToken::NewlyCalculated(operation));
                    }
                    uv_blocked = true;
                }
                Some(
                    operation @ (Ctap2UserVerificationOperation::GetPinUvAuthTokenUsingPinWithPermissions
                    | Ctap2UserVerificationOperation::GetPinToken),
                ) => {
                    self.verify_with_pin(channel, operation, request).await?;
                    self.authorize_request(request)?;
                    return Ok(UsedPinUvAuthToken::NewlyCalculated(operation));
                }
                Some(Ctap2UserVerificationOperation::ClientPinOnlyForSharedSecret) | None => {
                    warn!(uv_blocked, "No way left to verify the user");
                    return Err(if uv_blocked {
                        Error::Ctap(CtapError::UvBlocked)
                    } else {
                        Error::Platform(PlatformError::NoUvAvailable)
                    });
                }
            }
        }
    }

    pub(crate) fn uv_wanted(&self, requirement: UserVerificationRequirement) -> Result<bool, Error> {
        let protected = self.info.is_uv_protected();
        if requirement.is_required() && !protected {
            warn!("User verification is required, but no PIN or UV is set up");
            return Err(Error::Ctap(CtapError::PINNotSet));
        }
        Ok(protected && !requirement.is_discouraged())
    }

    /// Signs `request` with the token obtained by [`Self::negotiate`], if any.
    pub fn authorize_request<R: Ctap2UserVerifiableRequest>(
        &self,
        request: &mut R,
    ) -> Result<(), Error> {
        let Some(state) = self.authorized.as_ref() else {
            return Ok(());
        };
        match &state.token {
            Some(token) => request.calculate_and_set_uv_auth(state.protocol.as_ref(), token),
            None => Ok(()),
        }
    }

    async fn key_agreement<C>(&mut self, channel: &mut C) -> Result<PinProtocolState, Error>
    where
        C: Channel + ?Sized,
    {
        self.transition(NegotiatorState::KeyAgreement);
        let Some(&version) = self.protocols.first() else {
            error!(
                supported = ?self.info.pin_auth_protos,
                "No PIN/UV auth protocol in common with the authenticator"
            );
            return Err(Error::Platform(PlatformError::NoUvAvailable));
        };
        let peer = self.fetch_key_agreement(channel, version).await?;
        PinProtocolState::establish(version, &peer)
    }

    async fn fetch_key_agreement<C>(
        &self,
        channel: &mut C,
        version: Ctap2PinUvAuthProtocol,
    ) -> Result<PublicKey, Error>
    where
        C: Channel + ?Sized,
    {
        let request = Ctap2ClientPinRequest::new_get_key_agreement(version);
        let response = channel.ctap2_client_pin(&request, self.timeout).await?;
        response.key_agreement.ok_or_else(|| {
            error!("Missing key agreement key in response");
            Error::Protocol(ProtocolError::MissingField("keyAgreement"))
        })
    }

    async fn pin_retries<C>(&self, channel: &mut C, version: Ctap2PinUvAuthProtocol) -> Option<u32>
    where
        C: Channel + ?Sized,
    {
        // FIDO 2.1 dropped the protocol parameter from getPinRetries
        let protocol = (!self.info.supports_fido_2_1()).then_some(version);
        channel
            .ctap2_client_pin(&Ctap2ClientPinRequest::new_get_pin_retries(protocol), self.timeout)
            .await
            .map(|response| response.pin_retries)
            .ok() // It's optional, so soft-error here
            .flatten()
    }

    async fn uv_retries<C>(&self, channel: &mut C) -> Option<u32>
    where
        C: Channel + ?Sized,
    {
        channel
            .ctap2_client_pin(&Ctap2ClientPinRequest::new_get_uv_retries(), self.timeout)
            .await
            .map(|response| response.uv_retries)
            .ok()
            .flatten()
    }

    fn pin_blocked(&mut self) -> Error {
        warn!("PIN is blocked, the authenticator needs a reset");
        self.interaction.events().emit(UiEvent::PinBlocked);
        self.transition(NegotiatorState::Blocked);
        Error::Ctap(CtapError::PINBlocked)
    }

    async fn verify_with_pin<C, R>(
        &mut self,
        channel: &mut C,
        operation: Ctap2UserVerificationOperation,
        request: &R,
    ) -> Result<(), Error>
    where
        C: Channel + ?Sized,
        R: Ctap2UserVerifiableRequest,
    {
        let mut state = self.key_agreement(channel).await?;
        state.pin_retries = self.pin_retries(channel, state.version()).await;
        if state.pin_retries == Some(0) {
            return Err(self.pin_blocked());
        }

        let mut prompt = UiEvent::PinRequired {
            attempts_remaining: state.pin_retries,
        };
        loop {
            self.transition(NegotiatorState::AwaitingPin);
            let pin = self.interaction.request_pin(prompt.clone()).await?;
            if let Err(err) = check_pin_policy(&pin) {
                info!(%err, "PIN rejected before reaching the authenticator");
                prompt = UiEvent::PinRequired {
                    attempts_remaining: state.pin_retries,
                };
                continue;
            }

            self.transition(NegotiatorState::Verifying);
            let pin_hash_enc = state
                .protocol
                .encrypt(&state.shared_secret, &pin_hash(pin.as_bytes()))?;
            let token_request = match operation {
                Ctap2UserVerificationOperation::GetPinToken => {
                    Ctap2ClientPinRequest::new_get_pin_token(
                        state.version(),
                        state.platform_key.clone(),
                        &pin_hash_enc,
                    )
                }
                _ => Ctap2ClientPinRequest::new_get_pin_token_with_perm(
                    state.version(),
                    state.platform_key.clone(),
                    &pin_hash_enc,
                    request.permissions(),
                    request.permissions_rpid(),
                ),
            };

            match channel.ctap2_client_pin(&token_request, self.timeout).await {
                Ok(response) => {
                    state.store_token(response)?;
                    info!("PIN verified");
                    self.authorized = Some(state);
                    self.transition(NegotiatorState::Authorized);
                    return Ok(());
                }
                Err(Error::Ctap(CtapError::PINInvalid)) => {
                    let reported = self.pin_retries(channel, state.version()).await;
                    state.pin_retries = clamp_retries(state.pin_retries, reported);
                    if state.pin_retries == Some(0) {
                        return Err(self.pin_blocked());
                    }
                    warn!(attempts_remaining = ?state.pin_retries, "Wrong PIN");
                    // A wrong PIN makes the authenticator regenerate its key agreement key
                    self.transition(NegotiatorState::KeyAgreement);
                    let peer = self.fetch_key_agreement(channel, state.version()).await?;
                    state.rekey(&peer)?;
                    prompt = UiEvent::InvalidPin {
                        attempts_remaining: state.pin_retries,
                    };
                }
                Err(Error::Ctap(CtapError::PINBlocked)) => return Err(self.pin_blocked()),
                Err(Error::Ctap(CtapError::PINAuthBlocked)) => {
                    warn!("Too many wrong PINs in a row, the authenticator needs a power cycle");
                    self.interaction.events().emit(UiEvent::PinAuthBlocked);
                    self.transition(NegotiatorState::Blocked);
                    return Err(Error::Ctap(CtapError::PINAuthBlocked));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Returns `false` when built-in UV is blocked, and PIN should be tried instead.
    async fn verify_with_uv<C, R>(&mut self, channel: &mut C, request: &R) -> Result<bool, Error>
    where
        C: Channel + ?Sized,
        R: Ctap2UserVerifiableRequest,
    {
        let mut state = self.key_agreement(channel).await?;
        loop {
            self.transition(NegotiatorState::Verifying);
            self.interaction.events().emit(UiEvent::PresenceRequired);
            let token_request = Ctap2ClientPinRequest::new_get_uv_token_with_perm(
                state.version(),
                state.platform_key.clone(),
                request.permissions(),
                request.permissions_rpid(),
            );

            match channel.ctap2_client_pin(&token_request, self.uv_timeout).await {
                Ok(response) => {
                    state.store_token(response)?;
                    info!("Built-in user verification succeeded");
                    self.authorized = Some(state);
                    self.transition(NegotiatorState::Authorized);
                    return Ok(true);
                }
                Err(Error::Ctap(CtapError::UvBlocked)) => {
                    self.uv_blocked();
                    return Ok(false);
                }
                Err(Error::Ctap(CtapError::UVInvalid)) => {
                    let reported = self.uv_retries(channel).await;
                    state.uv_retries = clamp_retries(state.uv_retries, reported);
                    self.interaction.events().emit(UiEvent::InvalidUv {
                        attempts_remaining: state.uv_retries,
                    });
                    match state.uv_retries {
                        Some(0) => {
                            self.uv_blocked();
                            return Ok(false);
                        }
                        Some(attempts_remaining) => {
                            debug!(attempts_remaining, "Retrying built-in user verification")
                        }
                        None => return Err(Error::Ctap(CtapError::UVInvalid)),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn uv_blocked(&self) {
        warn!("Built-in user verification is blocked");
        self.interaction.events().emit(UiEvent::UvBlocked);
    }
}
