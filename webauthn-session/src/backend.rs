use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

pub use crate::config::BackendPreference;
use crate::config::SessionConfig;
use crate::ops::webauthn::{
    AuthenticationResponseJSON, GetAssertionRequest, MakeCredentialRequest, Origin,
    PublicKeyCredentialCreationOptionsJSON, PublicKeyCredentialRequestOptionsJSON,
    RegistrationResponseJSON, WebAuthnIDL,
};
use crate::session::{EventSink, Session, SessionHandle, UiEvent};
use crate::transport::{DeviceId, DeviceRegistry};
use crate::webauthn::error::Error;

/// Performs WebAuthn ceremonies for an origin. Prompts raised while an operation runs
/// are answered through the other methods.
///
/// Backends that drive their own user interface keep the default prompt methods,
/// which only log that they were not needed.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn register(
        &self,
        origin: &Origin,
        options: PublicKeyCredentialCreationOptionsJSON,
    ) -> Result<RegistrationResponseJSON, Error>;

    async fn authenticate(
        &self,
        origin: &Origin,
        options: PublicKeyCredentialRequestOptionsJSON,
    ) -> Result<AuthenticationResponseJSON, Error>;

    fn send_pin(&self, _pin: &str) {
        warn!(backend = self.name(), "send_pin is not required for this backend");
    }

    fn select_key(&self, index: usize) {
        warn!(backend = self.name(), index, "select_key is not required for this backend");
    }

    fn select_device(&self, id: &DeviceId) {
        warn!(backend = self.name(), %id, "select_device is not required for this backend");
    }

    fn cancel(&self) {
        warn!(backend = self.name(), "cancel is not supported by this backend");
    }

    fn subscribe(&self) -> broadcast::Receiver<UiEvent>;
}

/// Talks CTAP2 to roaming authenticators, running a fresh [`Session`] for every operation.
pub struct Ctap2Backend {
    registry: Arc<DeviceRegistry>,
    config: SessionConfig,
    events: EventSink,
    current: Mutex<Option<SessionHandle>>,
}

impl Ctap2Backend {
    pub fn new(registry: Arc<DeviceRegistry>, config: SessionConfig) -> Self {
        let events = EventSink::new(config.event_capacity);
        Self {
            registry,
            config,
            events,
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_session(&self) -> Session {
        let session =
            Session::with_event_sink(self.registry.clone(), self.config.clone(), self.events.clone());
        if let Some(previous) = self.current().replace(session.handle()) {
            if !previous.state().is_terminal() {
                warn!("Starting an operation while another one is running");
            }
        }
        session
    }

    fn end_session(&self, session: &Session) {
        let mut current = self.current();
        if current
            .as_ref()
            .is_some_and(|handle| handle.belongs_to(session))
        {
            current.take();
        }
    }

    fn with_current(&self, action: impl FnOnce(&SessionHandle)) {
        match self.current().as_ref() {
            Some(handle) => action(handle),
            None => debug!("No operation in progress, ignoring"),
        }
    }
}

#[async_trait]
impl CredentialBackend for Ctap2Backend {
    fn name(&self) -> &'static str {
        "ctap2"
    }

    #[instrument(skip_all, fields(%origin))]
    async fn register(
        &self,
        origin: &Origin,
        options: PublicKeyCredentialCreationOptionsJSON,
    ) -> Result<RegistrationResponseJSON, Error> {
        let mut session = self.start_session();
        let result = session.register(origin, options).await;
        self.end_session(&session);
        result
    }

    #[instrument(skip_all, fields(%origin))]
    async fn authenticate(
        &self,
        origin: &Origin,
        options: PublicKeyCredentialRequestOptionsJSON,
    ) -> Result<AuthenticationResponseJSON, Error> {
        let mut session = self.start_session();
        let result = session.authenticate(origin, options).await;
        self.end_session(&session);
        result
    }

    fn send_pin(&self, pin: &str) {
        self.with_current(|handle| handle.send_pin(pin));
    }

    fn select_key(&self, index: usize) {
        self.with_current(|handle| handle.select_key(index));
    }

    fn select_device(&self, id: &DeviceId) {
        self.with_current(|handle| handle.select_device(id));
    }

    fn cancel(&self) {
        self.with_current(SessionHandle::cancel);
    }

    fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }
}

/// The operating system's own WebAuthn implementation.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn make_credential(
        &self,
        request: &MakeCredentialRequest,
    ) -> Result<RegistrationResponseJSON, Error>;

    async fn get_assertion(
        &self,
        request: &GetAssertionRequest,
    ) -> Result<AuthenticationResponseJSON, Error>;
}

/// Hands operations to a [`PlatformAuthenticator`], which prompts the user itself.
pub struct PlatformBackend<P> {
    platform: P,
    events: EventSink,
}

impl<P: PlatformAuthenticator> PlatformBackend<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            events: EventSink::new(1),
        }
    }
}

#[async_trait]
impl<P: PlatformAuthenticator> CredentialBackend for PlatformBackend<P> {
    fn name(&self) -> &'static str {
        "platform"
    }

    #[instrument(skip_all, fields(%origin))]
    async fn register(
        &self,
        origin: &Origin,
        options: PublicKeyCredentialCreationOptionsJSON,
    ) -> Result<RegistrationResponseJSON, Error> {
        let request = MakeCredentialRequest::from_inner_model(origin, options)?;
        self.platform.make_credential(&request).await.map_err(|err| {
            warn!(?err, "Platform authenticator failed to register");
            err
        })
    }

    #[instrument(skip_all, fields(%origin))]
    async fn authenticate(
        &self,
        origin: &Origin,
        options: PublicKeyCredentialRequestOptionsJSON,
    ) -> Result<AuthenticationResponseJSON, Error> {
        let request = GetAssertionRequest::from_inner_model(origin, options)?;
        self.platform.get_assertion(&request).await.map_err(|err| {
            warn!(?err, "Platform authenticator failed to authenticate");
            err
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }
}

/// Picks the backend for this run according to [`SessionConfig::backend`]. `Auto`
/// prefers an available platform authenticator; an unavailable one always falls back
/// to CTAP2.
pub async fn select_backend<P>(
    platform: Option<P>,
    registry: Arc<DeviceRegistry>,
    config: SessionConfig,
) -> Box<dyn CredentialBackend>
where
    P: PlatformAuthenticator + 'static,
{
    let preference = config.backend;
    let platform = match (preference, platform) {
        (BackendPreference::Ctap2, _) | (_, None) => None,
        (_, Some(platform)) => {
            let available = platform.is_available().await;
            debug!(available, "Probed platform authenticator");
            available.then_some(platform)
        }
    };
    match platform {
        Some(platform) => {
            info!(?preference, "Using the platform authenticator");
            Box::new(PlatformBackend::new(platform))
        }
        None => {
            if preference == BackendPreference::Platform {
                warn!("Platform authenticator is not available, falling back to CTAP2");
            }
            info!(?preference, "Using CTAP2 authenticators");
            Box::new(Ctap2Backend::new(registry, config))
        }
    }
}
