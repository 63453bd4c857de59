//! Encrypted byte channel: AES-256 in CFB mode over any async stream.
//!
//! On open each side writes a fresh random IV in the clear and reads the
//! peer's. The two directions are keyed with the same channel key but run
//! their own IV, so they are encrypted and decrypted independently. CFB is
//! self-synchronising and byte-granular, so nothing is padded or held back.
//!
//! None of the I/O methods are cancel-safe: dropping a pending `send` or
//! `recv_frame` leaves the cipher state out of step with the peer. Callers
//! only race these calls against session cancellation, after which the
//! channel is dropped.

use aes::Aes256;
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use ring::rand::{SecureRandom, SystemRandom};
use tokio::io::{
    split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf,
};
use tracing::trace;

use crate::error::ProtocolError;

/// Channel key length (AES-256).
pub const KEY_LEN: usize = 32;

/// Initialisation vector length (one AES block).
pub const IV_LEN: usize = 16;

/// Maximum frame size (1 MiB). Prevents allocation bombs.
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// An established encrypted channel.
pub struct SecureChannel<S> {
    reader: SecureReader<ReadHalf<S>>,
    writer: SecureWriter<WriteHalf<S>>,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Exchange IVs with the peer and set up both cipher directions.
    pub async fn open(mut stream: S, key: &[u8; KEY_LEN]) -> Result<Self, ProtocolError> {
        let mut local_iv = [0u8; IV_LEN];
        SystemRandom::new()
            .fill(&mut local_iv)
            .map_err(|_| ProtocolError::Cipher("failed to generate IV".to_string()))?;

        stream.write_all(&local_iv).await?;
        stream.flush().await?;

        let mut peer_iv = [0u8; IV_LEN];
        stream.read_exact(&mut peer_iv).await?;

        let encryptor = BufEncryptor::<Aes256>::new_from_slices(key, &local_iv)
            .map_err(|_| ProtocolError::Cipher("invalid key or IV length".to_string()))?;
        let decryptor = BufDecryptor::<Aes256>::new_from_slices(key, &peer_iv)
            .map_err(|_| ProtocolError::Cipher("invalid key or IV length".to_string()))?;

        let (read_half, write_half) = split(stream);
        trace!("secure channel open");
        Ok(Self {
            reader: SecureReader {
                inner: read_half,
                cipher: decryptor,
            },
            writer: SecureWriter {
                inner: write_half,
                cipher: encryptor,
            },
        })
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.send(bytes).await
    }

    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        self.reader.receive(buf).await
    }

    pub async fn receive_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        self.reader.receive_exact(buf).await
    }

    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        self.writer.send_frame(payload).await
    }

    pub async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.reader.recv_frame().await
    }

    /// Split into halves that can be owned by different tasks.
    pub fn into_split(self) -> (SecureReader<ReadHalf<S>>, SecureWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

/// Decrypting half of a [`SecureChannel`].
pub struct SecureReader<R> {
    inner: R,
    cipher: BufDecryptor<Aes256>,
}

impl<R> SecureReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Read whatever is available (at least one byte unless the peer closed).
    ///
    /// Returns `Ok(0)` on a clean end of stream.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let n = self.inner.read(buf).await?;
        self.cipher.decrypt(&mut buf[..n]);
        Ok(n)
    }

    /// Fill `buf` completely.
    pub async fn receive_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        self.inner.read_exact(buf).await?;
        self.cipher.decrypt(buf);
        Ok(())
    }

    /// Receive one length-prefixed frame.
    ///
    /// Returns `None` if the peer closed the stream cleanly between frames.
    pub async fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        self.cipher.decrypt(&mut len_buf);

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len as usize,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut payload = vec![0u8; len as usize];
        self.receive_exact(&mut payload).await?;
        trace!(len, "received frame");
        Ok(Some(payload))
    }
}

/// Encrypting half of a [`SecureChannel`].
pub struct SecureWriter<W> {
    inner: W,
    cipher: BufEncryptor<Aes256>,
}

impl<W> SecureWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let mut buf = bytes.to_vec();
        self.cipher.encrypt(&mut buf);
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Send one length-prefixed frame.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_SIZE)
            .ok_or(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            })?;

        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(payload);
        self.send(&buf).await?;

        trace!(len, "sent frame");
        Ok(())
    }

    /// Close the write direction; the peer sees a clean end of stream.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
