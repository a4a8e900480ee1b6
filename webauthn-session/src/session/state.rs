use crate::webauthn::error::ErrorKind;

/// Where a [`Session`](super::Session) is in its one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    /// Waiting for the user to pick one of several authenticators.
    SelectingDevice,
    Connecting,
    /// PIN or built-in user verification in progress.
    Authorizing,
    Executing,
    Completed,
    Failed(ErrorKind),
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed(_) | SessionState::Cancelled
        )
    }
}
