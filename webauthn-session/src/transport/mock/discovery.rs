use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::channel::MockChannel;
use crate::transport::{
    CandidateDevice, Channel, DeviceId, Discovery, TransportError, TransportKind,
};
use crate::webauthn::Error;

/// A transport whose devices are [`MockChannel`]s.
pub struct MockDiscovery {
    transport: TransportKind,
    devices: Mutex<Vec<(CandidateDevice, MockChannel)>>,
    scan_error: Mutex<Option<TransportError>>,
    scans: AtomicUsize,
    connects: Mutex<Vec<DeviceId>>,
}

impl MockDiscovery {
    pub fn new(transport: TransportKind) -> Self {
        Self {
            transport,
            devices: Mutex::new(Vec::new()),
            scan_error: Mutex::new(None),
            scans: AtomicUsize::new(0),
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn add_device(&self, id: &str, name: Option<&str>, channel: MockChannel) -> CandidateDevice {
        let device = CandidateDevice::new(id, self.transport, name);
        self.devices
            .lock()
            .unwrap()
            .push((device.clone(), channel));
        device
    }

    /// Simulates the device being unplugged.
    pub fn remove_device(&self, id: &DeviceId) {
        self.devices.lock().unwrap().retain(|(device, _)| &device.id != id);
    }

    pub fn fail_scans(&self, error: TransportError) {
        *self.scan_error.lock().unwrap() = Some(error);
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Devices connected to so far, in order.
    pub fn connected(&self) -> Vec<DeviceId> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    fn transport(&self) -> TransportKind {
        self.transport
    }

    async fn scan(&self) -> Result<Vec<CandidateDevice>, Error> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.scan_error.lock().unwrap().clone() {
            return Err(Error::Transport(error));
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .map(|(device, _)| device.clone())
            .collect())
    }

    async fn connect(&self, device: &CandidateDevice) -> Result<Box<dyn Channel>, Error> {
        let channel = self
            .devices
            .lock()
            .unwrap()
            .iter()
            .find(|(candidate, _)| candidate.id == device.id)
            .map(|(_, channel)| channel.clone());
        let Some(channel) = channel else {
            return Err(Error::Transport(TransportError::UnknownDevice));
        };
        self.connects.lock().unwrap().push(device.id.clone());
        channel.mark_opened();
        Ok(Box::new(channel))
    }
}
