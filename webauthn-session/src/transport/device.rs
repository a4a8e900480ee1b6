use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Usb,
    Ble,
    Nfc,
}

impl TransportKind {
    pub fn all() -> Vec<TransportKind> {
        vec![TransportKind::Usb, TransportKind::Ble, TransportKind::Nfc]
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Usb => write!(f, "usb"),
            TransportKind::Ble => write!(f, "ble"),
            TransportKind::Nfc => write!(f, "nfc"),
        }
    }
}

/// Identifier that stays the same for a device across scans.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// An authenticator found by a scan. It is only a reference: the device may be gone
/// by the time it is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateDevice {
    pub id: DeviceId,
    pub transport: TransportKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CandidateDevice {
    pub fn new(id: impl Into<String>, transport: TransportKind, name: Option<&str>) -> Self {
        Self {
            id: DeviceId::new(id),
            transport,
            name: name.map(str::to_owned),
        }
    }
}

impl fmt::Display for CandidateDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({}, {})", name, self.transport, self.id),
            None => write!(f, "{} ({})", self.id, self.transport),
        }
    }
}
