//! Message framing: bincode v2 payloads inside secure-channel frames.
//!
//! Each message on the wire is one encrypted frame:
//!   [4 bytes big-endian length][bincode v2 payload]

use bincode::{Decode, Encode};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use crate::error::ProtocolError;
use crate::secure::{SecureReader, SecureWriter};

/// Encode a message to its bincode v2 payload.
pub fn encode_message<T: Encode>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(msg, config).map_err(|e| ProtocolError::Serialization(e.to_string()))
}

/// Decode a message from a bincode v2 payload (without the length prefix).
pub fn decode_message<T: Decode<()>>(payload: &[u8]) -> Result<T, ProtocolError> {
    let config = bincode::config::standard();
    let (msg, _) = bincode::decode_from_slice(payload, config)
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    Ok(msg)
}

impl<W> SecureWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Send one message as a single frame.
    pub async fn send_message<T: Encode>(&mut self, msg: &T) -> Result<(), ProtocolError> {
        let payload = encode_message(msg)?;
        self.send_frame(&payload).await?;
        trace!(len = payload.len(), "sent message");
        Ok(())
    }
}

impl<R> SecureReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Receive and decode one message.
    ///
    /// Returns `None` if the stream has been cleanly closed by the peer.
    pub async fn recv_message<T: Decode<()>>(&mut self) -> Result<Option<T>, ProtocolError> {
        match self.recv_frame().await? {
            Some(payload) => decode_message(&payload).map(Some),
            None => Ok(None),
        }
    }
}
