pub(crate) mod error;

#[cfg(test)]
/// A mock channel and discovery that can be used in tests to
/// queue expected requests and responses in unittests
pub mod mock;

mod channel;
mod device;
mod registry;

pub use channel::{Channel, ChannelStatus};
pub use device::{CandidateDevice, DeviceId, TransportKind};
pub use error::TransportError;
pub use registry::{DeviceRegistry, Discovery, OpenChannel};
