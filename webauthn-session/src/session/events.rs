use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::ops::webauthn::{Assertion, Base64UrlString};
use crate::proto::ctap2::Ctap2LastEnrollmentSampleStatus;
use crate::transport::CandidateDevice;

/// Something the user has to know about, or act upon.
///
/// Events that expect an answer are answered through the
/// [`SessionHandle`](super::SessionHandle) of the session that emitted them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UiEvent {
    /// More than one authenticator is connected. Answer with `select_device`.
    SelectDevice { devices: Vec<CandidateDevice> },
    /// Touch the authenticator.
    PresenceRequired,
    /// Answer with `send_pin`.
    PinRequired { attempts_remaining: Option<u32> },
    /// The PIN was wrong. Answer with `send_pin` to try again.
    InvalidPin { attempts_remaining: Option<u32> },
    /// Too many wrong PINs in a row. The authenticator has to be re-plugged.
    PinAuthBlocked,
    /// No PIN attempts left. The authenticator has to be reset.
    PinBlocked,
    InvalidUv { attempts_remaining: Option<u32> },
    UvBlocked,
    /// More than one credential matched. Answer with `select_key`.
    SelectKey { keys: Vec<KeyInfo> },
    FingerprintEnrollment {
        remaining_samples: u32,
        feedback: Ctap2LastEnrollmentSampleStatus,
    },
}

/// One of the credentials offered by [`UiEvent::SelectKey`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub index: usize,
    pub credential_id: Option<Base64UrlString>,
    pub user_handle: Option<Base64UrlString>,
    pub name: Option<String>,
    pub display_name: Option<String>,
}

impl KeyInfo {
    pub fn from_assertion(index: usize, assertion: &Assertion) -> Self {
        let user = assertion.user.as_ref();
        Self {
            index,
            credential_id: assertion
                .credential_id
                .as_ref()
                .map(|credential| Base64UrlString::from(credential.id.as_slice())),
            user_handle: user.map(|user| Base64UrlString::from(user.id.as_slice())),
            name: user.and_then(|user| user.name.clone()),
            display_name: user.and_then(|user| user.display_name.clone()),
        }
    }
}

/// Fans [`UiEvent`]s out to every subscriber of one session.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<UiEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: UiEvent) {
        trace!(?event, "Emitting UI event");
        if self.sender.send(event).is_err() {
            warn!("No subscriber is listening for UI events");
        }
    }
}
