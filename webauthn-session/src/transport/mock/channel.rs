use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    proto::ctap2::cbor::{CborRequest, CborResponse},
    transport::{error::TransportError, Channel, ChannelStatus},
    webauthn::Error,
};

enum MockReply {
    Response(CborResponse),
    /// The authenticator never answers, e.g. it waits for a touch.
    Hang,
}

#[derive(Default)]
struct MockState {
    expected_requests: VecDeque<CborRequest>,
    responses: VecDeque<MockReply>,
    opened: bool,
    closed: bool,
}

/// Queues expected requests and their responses. Clones share the same queues, so a
/// test can keep a handle after the channel was handed to a session.
#[derive(Clone)]
pub struct MockChannel {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::named("TestChannel")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn push_command_pair(&self, expected_request: CborRequest, response: CborResponse) {
        let mut state = self.state();
        state.expected_requests.push_back(expected_request);
        state.responses.push_back(MockReply::Response(response));
    }

    /// Expects `request`, then never responds to it.
    pub fn push_hanging_request(&self, expected_request: CborRequest) {
        let mut state = self.state();
        state.expected_requests.push_back(expected_request);
        state.responses.push_back(MockReply::Hang);
    }

    /// Expects `request`, without any response queued for it.
    pub fn push_expected_request(&self, expected_request: CborRequest) {
        self.state().expected_requests.push_back(expected_request);
    }

    /// A response the authenticator sends for a request nobody waits on anymore.
    /// It stays queued until someone reads from the channel.
    pub fn deliver_late_response(&self, response: CborResponse) {
        self.state()
            .responses
            .push_back(MockReply::Response(response));
    }

    pub fn pending_requests(&self) -> usize {
        self.state().expected_requests.len()
    }

    /// Responses nobody has read yet, hanging ones included.
    pub fn queued_responses(&self) -> usize {
        self.state().responses.len()
    }

    pub(crate) fn mark_opened(&self) {
        let mut state = self.state();
        state.opened = true;
        state.closed = false;
    }

    pub fn was_opened(&self) -> bool {
        self.state().opened
    }

    pub fn is_open(&self) -> bool {
        let state = self.state();
        state.opened && !state.closed
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl Display for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn status(&self) -> ChannelStatus {
        if self.is_closed() {
            ChannelStatus::Closed
        } else {
            ChannelStatus::Ready
        }
    }

    async fn close(&mut self) {
        self.state().closed = true;
    }

    async fn cbor_send(&mut self, request: &CborRequest, _timeout: Duration) -> Result<(), Error> {
        let mut state = self.state();
        if state.closed {
            return Err(Error::Transport(TransportError::ConnectionLost));
        }
        let expected = state
            .expected_requests
            .pop_front()
            .expect("No expected request found, but one was sent");
        assert_eq!(
            &expected,
            request,
            "{} items still in the queue",
            state.expected_requests.len()
        );
        Ok(())
    }

    async fn cbor_recv(&mut self, _timeout: Duration) -> Result<CborResponse, Error> {
        let reply = {
            let mut state = self.state();
            if state.closed {
                return Err(Error::Transport(TransportError::ConnectionLost));
            }
            state.responses.pop_front()
        };
        match reply {
            Some(MockReply::Response(response)) => Ok(response),
            Some(MockReply::Hang) => futures::future::pending().await,
            None => Err(Error::Transport(TransportError::Timeout)),
        }
    }
}
