use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::events::{EventSink, KeyInfo, UiEvent};
use crate::transport::{CandidateDevice, DeviceId};
use crate::webauthn::error::Error;

struct Pending<T> {
    reply_to: oneshot::Sender<T>,
    choices: Vec<T>,
}

/// Prompts waiting for the user. There is at most one outstanding prompt of each kind,
/// and answers for a prompt that is not outstanding are dropped.
pub(crate) struct Interaction {
    events: EventSink,
    pin: Mutex<Option<oneshot::Sender<Zeroizing<String>>>>,
    key: Mutex<Option<Pending<usize>>>,
    device: Mutex<Option<Pending<DeviceId>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn answer<T>(receiver: oneshot::Receiver<T>) -> Result<T, Error> {
    // The sender only goes away when the prompt was withdrawn
    receiver.await.map_err(|_| Error::Cancelled)
}

impl Interaction {
    pub fn new(events: EventSink) -> Self {
        Self {
            events,
            pin: Mutex::new(None),
            key: Mutex::new(None),
            device: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Emits `event`, which asks for a PIN, and waits for [`Self::send_pin`].
    pub async fn request_pin(&self, event: UiEvent) -> Result<Zeroizing<String>, Error> {
        let (reply_to, receiver) = oneshot::channel();
        *lock(&self.pin) = Some(reply_to);
        self.events.emit(event);
        answer(receiver).await
    }

    pub async fn request_key(&self, keys: Vec<KeyInfo>) -> Result<usize, Error> {
        let (reply_to, receiver) = oneshot::channel();
        *lock(&self.key) = Some(Pending {
            reply_to,
            choices: keys.iter().map(|key| key.index).collect(),
        });
        self.events.emit(UiEvent::SelectKey { keys });
        answer(receiver).await
    }

    pub async fn request_device(&self, devices: Vec<CandidateDevice>) -> Result<DeviceId, Error> {
        let (reply_to, receiver) = oneshot::channel();
        *lock(&self.device) = Some(Pending {
            reply_to,
            choices: devices.iter().map(|device| device.id.clone()).collect(),
        });
        self.events.emit(UiEvent::SelectDevice { devices });
        answer(receiver).await
    }

    pub fn pin_pending(&self) -> bool {
        lock(&self.pin).is_some()
    }

    pub fn send_pin(&self, pin: &str) {
        let Some(reply_to) = lock(&self.pin).take() else {
            debug!("No PIN was requested, ignoring");
            return;
        };
        if reply_to.send(Zeroizing::new(pin.to_owned())).is_err() {
            debug!("PIN prompt was withdrawn");
        }
    }

    pub fn select_key(&self, index: usize) {
        let mut slot = lock(&self.key);
        match slot.take() {
            Some(pending) if pending.choices.contains(&index) => {
                let _ = pending.reply_to.send(index);
            }
            Some(pending) => {
                warn!(index, "No such credential to select, ignoring");
                *slot = Some(pending);
            }
            None => debug!("No credential selection was requested, ignoring"),
        }
    }

    pub fn select_device(&self, id: &DeviceId) {
        let mut slot = lock(&self.device);
        match slot.take() {
            Some(pending) if pending.choices.contains(id) => {
                let _ = pending.reply_to.send(id.clone());
            }
            Some(pending) => {
                warn!(%id, "No such device to select, ignoring");
                *slot = Some(pending);
            }
            None => debug!("No device selection was requested, ignoring"),
        }
    }

    /// Withdraws every outstanding prompt.
    pub fn clear(&self) {
        lock(&self.pin).take();
        lock(&self.key).take();
        lock(&self.device).take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::transport::TransportKind;

    fn interaction() -> Arc<Interaction> {
        Arc::new(Interaction::new(EventSink::new(4)))
    }

    #[tokio::test]
    async fn pin_without_prompt_is_ignored() {
        let interaction = interaction();
        interaction.send_pin("1234");
        assert!(!interaction.pin_pending());

        let mut events = interaction.events().subscribe();
        let waiter = interaction.clone();
        let task = tokio::spawn(async move {
            waiter
                .request_pin(UiEvent::PinRequired {
                    attempts_remaining: Some(8),
                })
                .await
        });
        assert!(matches!(events.recv().await.unwrap(), UiEvent::PinRequired { .. }));
        assert!(interaction.pin_pending());
        interaction.send_pin("4321");
        assert_eq!(task.await.unwrap().unwrap().as_str(), "4321");
        assert!(!interaction.pin_pending());
    }

    #[tokio::test]
    async fn out_of_range_key_is_ignored() {
        let interaction = interaction();
        let mut events = interaction.events().subscribe();
        let waiter = interaction.clone();
        let keys = (0..2)
            .map(|index| KeyInfo {
                index,
                credential_id: None,
                user_handle: None,
                name: None,
                display_name: None,
            })
            .collect();
        let task = tokio::spawn(async move { waiter.request_key(keys).await });
        assert!(matches!(events.recv().await.unwrap(), UiEvent::SelectKey { .. }));

        interaction.select_key(5);
        interaction.select_key(1);
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_device_is_ignored() {
        let interaction = interaction();
        let mut events = interaction.events().subscribe();
        let waiter = interaction.clone();
        let devices = vec![
            CandidateDevice::new("a", TransportKind::Usb, None),
            CandidateDevice::new("b", TransportKind::Nfc, None),
        ];
        let task = tokio::spawn(async move { waiter.request_device(devices).await });
        assert!(matches!(events.recv().await.unwrap(), UiEvent::SelectDevice { .. }));

        interaction.select_device(&DeviceId::new("c"));
        interaction.select_device(&DeviceId::new("b"));
        assert_eq!(task.await.unwrap().unwrap(), DeviceId::new("b"));
    }

    #[tokio::test]
    async fn cleared_prompt_is_cancelled() {
        let interaction = interaction();
        let mut events = interaction.events().subscribe();
        let waiter = interaction.clone();
        let task = tokio::spawn(async move {
            waiter
                .request_pin(UiEvent::PinRequired {
                    attempts_remaining: None,
                })
                .await
        });
        events.recv().await.unwrap();
        interaction.clear();
        assert_eq!(task.await.unwrap().err(), Some(Error::Cancelled));
    }
}
