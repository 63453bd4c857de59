//! Protocol and transport errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("stream closed unexpectedly")]
    StreamClosed,

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("malformed control message: {0}")]
    MalformedSignal(String),

    #[error("control message failed authentication")]
    BadTag,

    #[error("stale control message: token {received} is not after {last}")]
    Replay { received: u64, last: u64 },

    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: u32 },

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("deserialisation error: {0}")]
    Deserialization(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProtocolError {
    /// Whether the error means the underlying transport is gone.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::StreamClosed | Self::Timeout(_)
        )
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::StreamClosed
        } else {
            Self::Connection(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_maps_to_stream_closed() {
        let err: ProtocolError = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(err, ProtocolError::StreamClosed));
        assert!(err.is_network());
    }

    #[test]
    fn auth_failure_is_not_network() {
        assert!(!ProtocolError::AuthFailure("x".into()).is_network());
        assert!(!ProtocolError::BadTag.is_network());
    }
}
