use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;

use crate::proto::ctap2::cbor::{CborRequest, CborResponse};
use crate::webauthn::error::Error;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Ready, // Channels are created asynchrounously, and are always ready.
    Processing,
    Closed,
}

/// A connection to exactly one authenticator.
///
/// Drivers implement the framing (CTAPHID, BLE fragments, NFC APDUs); everything
/// above works in whole CBOR frames. There is at most one outstanding request.
#[async_trait]
pub trait Channel: Send + Sync + Display {
    async fn status(&self) -> ChannelStatus;
    async fn close(&mut self);

    async fn cbor_send(&mut self, request: &CborRequest, timeout: Duration) -> Result<(), Error>;
    async fn cbor_recv(&mut self, timeout: Duration) -> Result<CborResponse, Error>;
}

#[async_trait]
impl<C> Channel for Box<C>
where
    C: Channel + ?Sized,
{
    async fn status(&self) -> ChannelStatus {
        (**self).status().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    async fn cbor_send(&mut self, request: &CborRequest, timeout: Duration) -> Result<(), Error> {
        (**self).cbor_send(request, timeout).await
    }

    async fn cbor_recv(&mut self, timeout: Duration) -> Result<CborResponse, Error> {
        (**self).cbor_recv(timeout).await
    }
}
