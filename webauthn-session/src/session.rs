pub mod events;
pub(crate) mod prompt;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

pub use events::{EventSink, KeyInfo, UiEvent};
pub use state::SessionState;

use crate::config::SessionConfig;
use crate::ops::webauthn::{
    Assertion, AuthenticationResponseJSON, GetAssertionRequest, MakeCredentialRequest, Origin,
    PublicKeyCredentialCreationOptionsJSON, PublicKeyCredentialRequestOptionsJSON,
    RegistrationResponseJSON, ResponseContext, UserVerificationRequirement, WebAuthnIDL,
    WebAuthnIDLResponse,
};
use crate::proto::ctap2::{
    Ctap2, Ctap2ClientPinRequest, Ctap2GetAssertionRequest, Ctap2GetInfoResponse,
    Ctap2MakeCredentialRequest, Ctap2UserVerifiableRequest, Ctap2UserVerificationOperation,
};
use crate::transport::{CandidateDevice, Channel, DeviceId, DeviceRegistry, OpenChannel};
use crate::webauthn::bio_enrollment;
use crate::webauthn::error::{CtapError, Error, ErrorKind, PlatformError, ProtocolError};
use crate::webauthn::negotiator::{NegotiatorState, PinUvNegotiator, UsedPinUvAuthToken};
use prompt::Interaction;

struct Shared {
    interaction: Interaction,
    cancelled: watch::Sender<bool>,
    state: watch::Sender<SessionState>,
}

impl Shared {
    async fn cancelled(&self) {
        let mut cancelled = self.cancelled.subscribe();
        if cancelled.wait_for(|cancelled| *cancelled).await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

/// Answers the prompts of a [`Session`], and cancels it, from other tasks.
#[derive(Clone)]
pub struct SessionHandle(Arc<Shared>);

impl SessionHandle {
    /// Answers a pending PIN prompt. Does nothing if no PIN is being asked for.
    pub fn send_pin(&self, pin: &str) {
        self.0.interaction.send_pin(pin);
    }

    /// Picks the credential at `index` of the last [`UiEvent::SelectKey`].
    pub fn select_key(&self, index: usize) {
        self.0.interaction.select_key(index);
    }

    pub fn select_device(&self, id: &DeviceId) {
        self.0.interaction.select_device(id);
    }

    /// Cancels the operation in flight. Has no effect once the session has finished.
    pub fn cancel(&self) {
        let state = self.state();
        if state.is_terminal() {
            debug!(?state, "Session already finished, ignoring cancel");
            return;
        }
        if self.0.cancelled.send_replace(true) {
            debug!("Session already cancelled");
            return;
        }
        info!(?state, "Cancelling session");
        self.0.interaction.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.0.interaction.events().subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.0.state.borrow()
    }

    /// Follows state changes as they happen.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.0.state.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.cancelled.borrow()
    }

    pub(crate) fn belongs_to(&self, session: &Session) -> bool {
        Arc::ptr_eq(&self.0, &session.shared)
    }
}

enum Operation<'r> {
    Register(&'r MakeCredentialRequest),
    Authenticate(&'r GetAssertionRequest),
    EnrollFingerprint(Option<&'r str>),
}

impl Operation<'_> {
    fn name(&self) -> &'static str {
        match self {
            Operation::Register(_) => "register",
            Operation::Authenticate(_) => "authenticate",
            Operation::EnrollFingerprint(_) => "enroll_fingerprint",
        }
    }
}

enum Outcome {
    Registered(RegistrationResponseJSON),
    Authenticated(AuthenticationResponseJSON),
    Enrolled(Vec<u8>),
}

/// One operation against one authenticator, from device selection to the result.
///
/// Prompts are emitted as [`UiEvent`]s to this session's subscribers and answered
/// through its [`SessionHandle`]. A session runs a single operation; create a new one
/// for the next.
pub struct Session {
    registry: Arc<DeviceRegistry>,
    config: SessionConfig,
    shared: Arc<Shared>,
    history: Vec<SessionState>,
    negotiator_history: Vec<NegotiatorState>,
    channel: Option<OpenChannel>,
}

impl Session {
    pub fn new(registry: Arc<DeviceRegistry>, config: SessionConfig) -> Self {
        let events = EventSink::new(config.event_capacity);
        Self::with_event_sink(registry, config, events)
    }

    /// Emits into an existing sink, so one subscriber can follow consecutive sessions.
    pub(crate) fn with_event_sink(
        registry: Arc<DeviceRegistry>,
        config: SessionConfig,
        events: EventSink,
    ) -> Self {
        let shared = Shared {
            interaction: Interaction::new(events),
            cancelled: watch::Sender::new(false),
            state: watch::Sender::new(SessionState::Created),
        };
        Self {
            registry,
            config,
            shared: Arc::new(shared),
            history: vec![SessionState::Created],
            negotiator_history: Vec::new(),
            channel: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle(self.shared.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.shared.interaction.events().subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.history
            .last()
            .copied()
            .unwrap_or(SessionState::Created)
    }

    /// Every state this session went through, oldest first.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn negotiator_history(&self) -> &[NegotiatorState] {
        &self.negotiator_history
    }

    pub async fn register(
        &mut self,
        origin: &Origin,
        options: PublicKeyCredentialCreationOptionsJSON,
    ) -> Result<RegistrationResponseJSON, Error> {
        self.ensure_unused()?;
        let request = match MakeCredentialRequest::from_inner_model(origin, options) {
            Ok(request) => request,
            Err(err) => return self.finish(Err(err)).await,
        };
        match self.run(Operation::Register(&request)).await? {
            Outcome::Registered(response) => Ok(response),
            _ => unreachable!("registration always yields a registration response"),
        }
    }

    pub async fn authenticate(
        &mut self,
        origin: &Origin,
        options: PublicKeyCredentialRequestOptionsJSON,
    ) -> Result<AuthenticationResponseJSON, Error> {
        self.ensure_unused()?;
        let request = match GetAssertionRequest::from_inner_model(origin, options) {
            Ok(request) => request,
            Err(err) => return self.finish(Err(err)).await,
        };
        match self.run(Operation::Authenticate(&request)).await? {
            Outcome::Authenticated(response) => Ok(response),
            _ => unreachable!("authentication always yields an assertion"),
        }
    }

    /// Enrolls a fingerprint on the authenticator, and returns its template ID.
    pub async fn enroll_fingerprint(&mut self, name: Option<&str>) -> Result<Vec<u8>, Error> {
        self.ensure_unused()?;
        match self.run(Operation::EnrollFingerprint(name)).await? {
            Outcome::Enrolled(template_id) => Ok(template_id),
            _ => unreachable!("enrollment always yields a template ID"),
        }
    }

    fn ensure_unused(&self) -> Result<(), Error> {
        if self.state() != SessionState::Created {
            warn!(state = ?self.state(), "Session was already used");
            return Err(Error::Platform(PlatformError::SessionAlreadyUsed));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(operation = operation.name()))]
    async fn run(&mut self, operation: Operation<'_>) -> Result<Outcome, Error> {
        let shared = self.shared.clone();
        let mut driver = Driver {
            registry: &self.registry,
            config: &self.config,
            shared: &shared,
            history: &mut self.history,
            negotiator_history: &mut self.negotiator_history,
        };
        let result = tokio::select! {
            biased;
            _ = shared.cancelled() => Err(Error::Cancelled),
            result = driver.drive(&mut self.channel, operation) => result,
        };
        self.finish(result).await
    }

    async fn finish<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.shared.interaction.clear();

        let next = match &result {
            Ok(_) => {
                info!("Session completed");
                SessionState::Completed
            }
            Err(Error::Cancelled) => {
                info!("Session cancelled");
                SessionState::Cancelled
            }
            Err(err) => {
                warn!(?err, kind = err.kind().as_str(), "Session failed");
                SessionState::Failed(err.kind())
            }
        };
        if next == SessionState::Cancelled
            && matches!(self.negotiator_history.last(), Some(state) if !state.is_terminal())
        {
            self.negotiator_history
                .push(NegotiatorState::Failed(ErrorKind::Cancelled));
        }
        advance(&mut self.history, &self.shared, next);
        result
    }
}

fn advance(history: &mut Vec<SessionState>, shared: &Shared, next: SessionState) {
    let current = history.last().copied().unwrap_or(SessionState::Created);
    debug!(from = ?current, to = ?next, "Session transition");
    history.push(next);
    shared.state.send_replace(next);
}

/// Upper bound on the discoverable credentials collected for one assertion.
const MAX_CREDENTIALS_COUNT: usize = 256;

/// Built-in UV tokens already carry the user's presence.
fn needs_touch(used: UsedPinUvAuthToken) -> bool {
    used != UsedPinUvAuthToken::NewlyCalculated(
        Ctap2UserVerificationOperation::GetPinUvAuthTokenUsingUvWithPermissions,
    )
}

async fn uv_rejected<C>(channel: &mut C, events: &EventSink, timeout: Duration) -> Error
where
    C: Channel + ?Sized,
{
    let attempts_remaining = channel
        .ctap2_client_pin(&Ctap2ClientPinRequest::new_get_uv_retries(), timeout)
        .await
        .map(|response| response.uv_retries)
        .ok() // It's optional, so soft-error here
        .flatten();
    warn!(?attempts_remaining, "User verification failed");
    events.emit(UiEvent::InvalidUv { attempts_remaining });
    Error::Ctap(CtapError::UVInvalid)
}

fn response_context(
    client_data_json: &str,
    info: &Ctap2GetInfoResponse,
    device: &CandidateDevice,
) -> ResponseContext {
    ResponseContext {
        client_data_json: client_data_json.to_owned(),
        transports: info
            .transports
            .clone()
            .unwrap_or_else(|| vec![device.transport.to_string()]),
    }
}

/// The parts of a [`Session`] an operation works on while it runs.
struct Driver<'s> {
    registry: &'s DeviceRegistry,
    config: &'s SessionConfig,
    shared: &'s Shared,
    history: &'s mut Vec<SessionState>,
    negotiator_history: &'s mut Vec<NegotiatorState>,
}

impl Driver<'_> {
    async fn drive(
        &mut self,
        slot: &mut Option<OpenChannel>,
        operation: Operation<'_>,
    ) -> Result<Outcome, Error> {
        let device = self.select_device().await?;
        advance(self.history, self.shared, SessionState::Connecting);
        let channel = slot.insert(self.registry.open(&device).await?);
        let info = channel.ctap2_get_info(self.config.get_info_timeout()).await?;
        debug!(dev = %channel, versions = ?info.versions, options = ?info.options, "Authenticator info");

        match operation {
            Operation::Register(request) => self
                .make_credential(channel, &info, request)
                .await
                .map(Outcome::Registered),
            Operation::Authenticate(request) => self
                .get_assertion(channel, &info, request)
                .await
                .map(Outcome::Authenticated),
            Operation::EnrollFingerprint(name) => self
                .enroll_fingerprint(channel, &info, name)
                .await
                .map(Outcome::Enrolled),
        }
    }

    async fn select_device(&mut self) -> Result<CandidateDevice, Error> {
        let mut candidates = self.registry.refresh().await;
        match candidates.len() {
            0 => {
                warn!("No authenticator found");
                Err(Error::DeviceUnavailable)
            }
            1 => {
                let device = candidates.remove(0);
                debug!(dev = %device, "Using the only authenticator");
                Ok(device)
            }
            count => {
                advance(self.history, self.shared, SessionState::SelectingDevice);
                debug!(count, "Asking the user to pick an authenticator");
                let id = self
                    .shared
                    .interaction
                    .request_device(candidates.clone())
                    .await?;
                let device = candidates
                    .into_iter()
                    .find(|device| device.id == id)
                    .ok_or(Error::DeviceUnavailable)?;
                info!(dev = %device, "Authenticator selected");
                Ok(device)
            }
        }
    }

    fn operation_timeout(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or_else(|| self.config.operation_timeout())
    }

    /// Runs PIN/UV negotiation for `request`, going through `Authorizing` only when
    /// the user has to be verified.
    async fn authorize<R>(
        &mut self,
        channel: &mut OpenChannel,
        info: &Ctap2GetInfoResponse,
        requirement: UserVerificationRequirement,
        uv_timeout: Duration,
        request: &mut R,
    ) -> Result<UsedPinUvAuthToken, Error>
    where
        R: Ctap2UserVerifiableRequest,
    {
        let mut negotiator = PinUvNegotiator::new(
            info,
            &self.shared.interaction,
            &self.config.pin_uv_auth_protocols,
            self.config.get_info_timeout(),
            uv_timeout,
            self.negotiator_history,
        );
        if !matches!(negotiator.uv_wanted(requirement), Ok(false)) {
            advance(self.history, self.shared, SessionState::Authorizing);
        }
        negotiator.negotiate(channel, requirement, request).await
    }

    async fn make_credential(
        &mut self,
        channel: &mut OpenChannel,
        info: &Ctap2GetInfoResponse,
        request: &MakeCredentialRequest,
    ) -> Result<RegistrationResponseJSON, Error> {
        let timeout = self.operation_timeout(request.timeout);
        let mut ctap_request = Ctap2MakeCredentialRequest::from_webauthn_request(request, info);
        let used = self
            .authorize(channel, info, request.user_verification, timeout, &mut ctap_request)
            .await?;

        advance(self.history, self.shared, SessionState::Executing);
        if needs_touch(used) {
            self.shared.interaction.events().emit(UiEvent::PresenceRequired);
        }
        let reply = match channel.ctap2_make_credential(&ctap_request, timeout).await {
            Err(Error::Ctap(CtapError::UVInvalid)) => {
                let events = self.shared.interaction.events();
                return Err(uv_rejected(channel, events, self.config.get_info_timeout()).await);
            }
            reply => reply?,
        };
        let response = reply.body.into_make_credential_output(reply.unknown_fields);
        info!(format = %response.format, "Credential created");
        response.to_idl_model(&response_context(
            &request.client_data_json,
            info,
            channel.device(),
        ))
    }

    async fn get_assertion(
        &mut self,
        channel: &mut OpenChannel,
        info: &Ctap2GetInfoResponse,
        request: &GetAssertionRequest,
    ) -> Result<AuthenticationResponseJSON, Error> {
        let timeout = self.operation_timeout(request.timeout);
        let mut ctap_request = Ctap2GetAssertionRequest::from(request);
        let used = self
            .authorize(channel, info, request.user_verification, timeout, &mut ctap_request)
            .await?;

        advance(self.history, self.shared, SessionState::Executing);
        if needs_touch(used) {
            self.shared.interaction.events().emit(UiEvent::PresenceRequired);
        }
        let reply = match channel.ctap2_get_assertion(&ctap_request, timeout).await {
            Err(Error::Ctap(CtapError::UVInvalid)) => {
                let events = self.shared.interaction.events();
                return Err(uv_rejected(channel, events, self.config.get_info_timeout()).await);
            }
            reply => reply?,
        };
        let first = reply.body.into_assertion_output(request, reply.unknown_fields);
        let assertion = self.choose_assertion(channel, request, first).await?;
        info!("Assertion obtained");
        assertion.to_idl_model(&response_context(
            &request.client_data_json,
            info,
            channel.device(),
        ))
    }

    /// Collects every matching credential and lets the user pick one, unless the
    /// authenticator already did.
    async fn choose_assertion(
        &mut self,
        channel: &mut OpenChannel,
        request: &GetAssertionRequest,
        first: Assertion,
    ) -> Result<Assertion, Error> {
        let reported = first.credentials_count.unwrap_or(1);
        if reported <= 1 || first.user_selected == Some(true) {
            return Ok(first);
        }
        let limit = match request.allow.len() {
            0 => MAX_CREDENTIALS_COUNT,
            allowed => allowed,
        };
        let count = reported as usize;
        if count > limit {
            warn!(reported, limit, "Authenticator reported too many credentials");
            return Err(Error::Protocol(ProtocolError::InvalidCredentialsCount(reported)));
        }

        debug!(count, "Several credentials matched");
        let mut assertions = vec![first];
        for _ in 1..count {
            let reply = channel
                .ctap2_get_next_assertion(self.config.get_info_timeout())
                .await?;
            assertions.push(reply.body.into_assertion_output(request, reply.unknown_fields));
        }

        let keys = assertions
            .iter()
            .enumerate()
            .map(|(index, assertion)| KeyInfo::from_assertion(index, assertion))
            .collect();
        let index = self.shared.interaction.request_key(keys).await?;
        debug!(index, "Credential selected");
        Ok(assertions.swap_remove(index))
    }

    async fn enroll_fingerprint(
        &mut self,
        channel: &mut OpenChannel,
        info: &Ctap2GetInfoResponse,
        name: Option<&str>,
    ) -> Result<Vec<u8>, Error> {
        let timeout = self.config.operation_timeout();
        let mut negotiator = PinUvNegotiator::new(
            info,
            &self.shared.interaction,
            &self.config.pin_uv_auth_protocols,
            self.config.get_info_timeout(),
            timeout,
            self.negotiator_history,
        );
        advance(self.history, self.shared, SessionState::Authorizing);
        let begin = bio_enrollment::authorize_enrollment(channel, &mut negotiator).await?;

        advance(self.history, self.shared, SessionState::Executing);
        bio_enrollment::enroll_fingerprint(
            channel,
            &negotiator,
            &begin,
            self.shared.interaction.events(),
            name,
            timeout,
        )
        .await
    }
}
