//! Session errors.

use farhand_input::InputError;
use farhand_protocol::ProtocolError;
use thiserror::Error;

use crate::state::SessionState;

#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket-level failure. Always terminal for the session.
    #[error("network error: {0}")]
    Network(ProtocolError),

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("startup failed: {0}")]
    StartupFailure(String),

    #[error("input error: {0}")]
    Input(#[from] InputError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session cancelled")]
    Cancelled,

    /// The local side dropped the session without closing it.
    #[error("session aborted")]
    Aborted,

    #[error("session is no longer running")]
    SessionGone,

    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ProtocolError> for SessionError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::AuthFailure(reason) => Self::AuthFailure(reason),
            e if e.is_network() => Self::Network(e),
            e => Self::Protocol(e),
        }
    }
}
