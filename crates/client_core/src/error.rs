use chat_shared::error::WireError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected http status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email and password must both be set")]
    InvalidCredentials,
    #[error("checkpoint challenge did not reach the home page")]
    CheckpointExhausted,
    #[error("login failed after {attempts} attempt(s); check email/password")]
    LoginFailed { attempts: u32 },
    #[error("security code unavailable: {0}")]
    CodeUnavailable(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AuthError {
    /// Terminal errors end `authenticate` immediately instead of consuming a retry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::CheckpointExhausted
                | AuthError::CodeUnavailable(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("push channel handshake response has no load-balancer metadata")]
    HandshakeMalformed,
    #[error("push channel handshake failed: {0}")]
    Transport(#[from] TransportError),
    #[error("push channel reported the sticky tokens invalid")]
    Invalidated,
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("listener is not listening")]
    NotListening,
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("pull timed out")]
    Timeout,
    #[error("pull failed: {0}")]
    Transport(TransportError),
    #[error("pull response could not be decoded: {0}")]
    Decode(#[from] WireError),
    #[error("push channel requested a refresh")]
    ChannelInvalidated,
    #[error("listener has no channel")]
    NoChannel,
}

impl From<TransportError> for PollError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => PollError::Timeout,
            other => PollError::Transport(other),
        }
    }
}

impl PollError {
    /// Only a channel invalidation ends the listening loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PollError::ChannelInvalidated)
    }
}

/// Why a single envelope entry did not become a typed event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassificationFault {
    #[error("entry is missing `{0}`")]
    MissingField(&'static str),
    #[error("thread reference has neither a group key nor a peer-user key")]
    UnresolvedThread,
    #[error("entry payload is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum DispatchFault {
    #[error("handler failed: {0}")]
    Failed(anyhow::Error),
    #[error("handler panicked: {0}")]
    Panicked(String),
}
