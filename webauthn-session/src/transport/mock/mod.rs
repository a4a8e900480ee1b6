pub mod channel;
pub mod discovery;

pub use channel::MockChannel;
pub use discovery::MockDiscovery;
