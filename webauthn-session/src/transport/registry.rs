use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::channel::{Channel, ChannelStatus};
use super::device::{CandidateDevice, DeviceId, TransportKind};
use super::error::TransportError;
use crate::config::SessionConfig;
use crate::proto::ctap2::cbor::{CborRequest, CborResponse};
use crate::webauthn::error::Error;

/// Finds authenticators on one transport, and connects to them.
#[async_trait]
pub trait Discovery: Send + Sync {
    fn transport(&self) -> TransportKind;

    /// Lists the devices currently reachable. No devices is an empty list, not an error.
    async fn scan(&self) -> Result<Vec<CandidateDevice>, Error>;

    async fn connect(&self, device: &CandidateDevice) -> Result<Box<dyn Channel>, Error>;
}

/// Tracks reachable authenticators across all enabled transports, and hands out
/// channels to them, one at a time per device.
pub struct DeviceRegistry {
    transports: Vec<TransportKind>,
    discoveries: Vec<Arc<dyn Discovery>>,
    // Each candidate with the index of the discovery that found it
    candidates: Arc<Mutex<Vec<(CandidateDevice, usize)>>>,
    open: Arc<Mutex<HashSet<DeviceId>>>,
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("transports", &self.transports)
            .field("discoveries", &self.discoveries.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded sets stay consistent even if a holder panicked.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DeviceRegistry {
    pub fn new(transports: &[TransportKind]) -> Self {
        Self {
            transports: transports.to_vec(),
            discoveries: Vec::new(),
            candidates: Arc::new(Mutex::new(Vec::new())),
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// A registry for the transports `config` enables.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.transports)
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn Discovery>) -> Self {
        if !self.transports.contains(&discovery.transport()) {
            debug!(transport = %discovery.transport(), "Transport disabled, ignoring discovery");
            return self;
        }
        self.discoveries.push(discovery);
        self
    }

    fn scan_all(&self) -> BoxStream<'_, (CandidateDevice, usize)> {
        stream::iter(self.discoveries.iter().enumerate())
            .then(|(index, discovery)| async move {
                match discovery.scan().await {
                    Ok(devices) => {
                        debug!(transport = %discovery.transport(), count = devices.len(), "Scanned transport");
                        devices.into_iter().map(|device| (device, index)).collect()
                    }
                    Err(err) => {
                        warn!(transport = %discovery.transport(), ?err, "Scan failed, skipping transport");
                        Vec::new()
                    }
                }
            })
            .flat_map(stream::iter)
            .boxed()
    }

    /// Scans every enabled transport, lazily: nothing is scanned until the stream is
    /// polled, and every call starts over. Transports failing to scan are skipped.
    pub fn discover(&self) -> BoxStream<'_, CandidateDevice> {
        let candidates = self.candidates.clone();
        self.scan_all()
            .map(move |(device, index)| {
                let mut known = lock(&candidates);
                known.retain(|(existing, _)| existing.id != device.id);
                known.push((device.clone(), index));
                device
            })
            .boxed()
    }

    /// Runs a full scan, replacing the known candidates with what it found.
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Vec<CandidateDevice> {
        let found: Vec<(CandidateDevice, usize)> = self.scan_all().collect().await;
        info!(count = found.len(), "Discovered candidate devices");
        let devices = found.iter().map(|(device, _)| device.clone()).collect();
        *lock(&self.candidates) = found;
        devices
    }

    /// Candidates found by the last scan.
    pub fn candidates(&self) -> Vec<CandidateDevice> {
        lock(&self.candidates)
            .iter()
            .map(|(device, _)| device.clone())
            .collect()
    }

    pub fn is_open(&self, id: &DeviceId) -> bool {
        lock(&self.open).contains(id)
    }

    /// Opens a channel to `candidate`. Fails with [`Error::DeviceUnavailable`] if the
    /// device is already open, or cannot be reached anymore.
    #[instrument(skip_all, fields(dev = %candidate))]
    pub async fn open(&self, candidate: &CandidateDevice) -> Result<OpenChannel, Error> {
        let index = lock(&self.candidates)
            .iter()
            .find(|(device, _)| device.id == candidate.id)
            .map(|(_, index)| *index);
        let Some(discovery) = index.and_then(|index| self.discoveries.get(index)) else {
            warn!("Device was not found by the last scan");
            return Err(Error::DeviceUnavailable);
        };

        if !lock(&self.open).insert(candidate.id.clone()) {
            warn!("Device is already in use");
            return Err(Error::DeviceUnavailable);
        }
        let lease = DeviceLease {
            id: candidate.id.clone(),
            open: self.open.clone(),
        };

        match discovery.connect(candidate).await {
            Ok(channel) => {
                debug!("Channel opened");
                Ok(OpenChannel {
                    device: candidate.clone(),
                    channel,
                    closed: false,
                    lease: Some(lease),
                })
            }
            Err(err) => {
                warn!(?err, "Failed to connect to device");
                Err(Error::DeviceUnavailable)
            }
        }
    }
}

/// Exclusive claim on a device, given up on drop.
struct DeviceLease {
    id: DeviceId,
    open: Arc<Mutex<HashSet<DeviceId>>>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        lock(&self.open).remove(&self.id);
    }
}

/// A channel obtained from [`DeviceRegistry::open`]. The device stays claimed until the
/// channel is closed or dropped.
pub struct OpenChannel {
    device: CandidateDevice,
    channel: Box<dyn Channel>,
    closed: bool,
    lease: Option<DeviceLease>,
}

impl OpenChannel {
    pub fn device(&self) -> &CandidateDevice {
        &self.device
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Display for OpenChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channel)
    }
}

#[async_trait]
impl Channel for OpenChannel {
    async fn status(&self) -> ChannelStatus {
        if self.closed {
            return ChannelStatus::Closed;
        }
        self.channel.status().await
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.channel.close().await;
            self.lease.take();
            debug!(dev = %self.device, "Channel closed");
        }
    }

    async fn cbor_send(&mut self, request: &CborRequest, timeout: Duration) -> Result<(), Error> {
        if self.closed {
            warn!(dev = %self.device, "Sending on a closed channel");
            return Err(Error::Transport(TransportError::ConnectionLost));
        }
        self.channel.cbor_send(request, timeout).await
    }

    async fn cbor_recv(&mut self, timeout: Duration) -> Result<CborResponse, Error> {
        if self.closed {
            return Err(Error::Transport(TransportError::ConnectionLost));
        }
        self.channel.cbor_recv(timeout).await
    }
}
