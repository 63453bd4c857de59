//! Control channel: signed lifecycle signals in both directions.
//!
//! The orchestrator keeps the writing half and signs outgoing signals
//! itself. A reader task verifies incoming frames and forwards what it
//! finds, in order, to the orchestrator loop.

use farhand_protocol::{ProtocolError, SecureReader, SecureWriter, SignalSigner, SignalVerifier};
use farhand_types::LifecycleSignal;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::SessionError;

/// What the control reader saw.
#[derive(Debug)]
pub(crate) enum ControlEvent {
    /// A verified signal from the peer.
    Signal(LifecycleSignal),
    /// A frame that failed verification. Dropped; never fatal.
    Rejected(ProtocolError),
    /// The peer closed the control channel.
    Closed,
    /// The control channel failed.
    Failed(ProtocolError),
}

impl ControlEvent {
    fn ends_stream(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

/// Read and verify control frames until the channel ends or `cancel` fires.
pub(crate) async fn read_signals<R>(
    mut reader: SecureReader<R>,
    mut verifier: SignalVerifier,
    events: mpsc::Sender<ControlEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            frame = reader.recv_frame() => frame,
        };
        let event = match frame {
            Ok(Some(frame)) => match verifier.verify(&frame) {
                Ok(signal) => {
                    trace!(signal = %signal, "verified control signal");
                    ControlEvent::Signal(signal)
                }
                Err(e) => ControlEvent::Rejected(e),
            },
            Ok(None) => ControlEvent::Closed,
            Err(e) => ControlEvent::Failed(e),
        };
        let last = event.ends_stream();
        if events.send(event).await.is_err() || last {
            debug!("control reader finished");
            return;
        }
    }
}

/// The writing half of the control channel with its signer.
pub(crate) struct ControlLink<W> {
    writer: SecureWriter<W>,
    signer: SignalSigner,
}

impl<W> ControlLink<W>
where
    W: AsyncWrite + Unpin,
{
    pub(crate) fn new(writer: SecureWriter<W>, signer: SignalSigner) -> Self {
        Self { writer, signer }
    }

    pub(crate) async fn send(&mut self, signal: LifecycleSignal) -> Result<(), SessionError> {
        let frame = self.signer.sign(signal);
        self.writer.send_frame(&frame).await?;
        debug!(signal = %signal, "sent control signal");
        Ok(())
    }

    /// Close our direction so the peer sees a clean end of stream.
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use farhand_protocol::{SecureChannel, SessionKeys};
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    const KEY: [u8; 32] = [5u8; 32];

    async fn link() -> (
        SecureReader<ReadHalf<DuplexStream>>,
        SecureWriter<WriteHalf<DuplexStream>>,
    ) {
        let (a, b) = duplex(4096);
        let (a, b) = tokio::join!(SecureChannel::open(a, &KEY), SecureChannel::open(b, &KEY));
        let (_, writer) = a.unwrap().into_split();
        let (reader, _) = b.unwrap().into_split();
        (reader, writer)
    }

    async fn next(events: &mut mpsc::Receiver<ControlEvent>) -> ControlEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn signer_and_verifier(secret: &[u8]) -> (SignalSigner, SignalVerifier) {
        let keys = SessionKeys::from_secret(secret);
        (SignalSigner::new(keys.clone()), SignalVerifier::new(keys))
    }

    #[tokio::test]
    async fn signals_flow_in_order_then_close() {
        let (reader, writer) = link().await;
        let (signer, verifier) = signer_and_verifier(b"session");
        let (tx, mut rx) = mpsc::channel(8);
        let task = tokio::spawn(read_signals(reader, verifier, tx, CancellationToken::new()));

        let mut control = ControlLink::new(writer, signer);
        control.send(LifecycleSignal::Suspend).await.unwrap();
        control.send(LifecycleSignal::Resume).await.unwrap();
        control.shutdown().await;

        assert!(matches!(
            next(&mut rx).await,
            ControlEvent::Signal(LifecycleSignal::Suspend)
        ));
        assert!(matches!(
            next(&mut rx).await,
            ControlEvent::Signal(LifecycleSignal::Resume)
        ));
        assert!(matches!(next(&mut rx).await, ControlEvent::Closed));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn forged_signal_is_rejected_and_reading_continues() {
        let (reader, mut writer) = link().await;
        let (signer, verifier) = signer_and_verifier(b"session");
        let (mut forger, _) = signer_and_verifier(b"attacker");
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(read_signals(reader, verifier, tx, CancellationToken::new()));

        writer
            .send_frame(&forger.sign(LifecycleSignal::Close))
            .await
            .unwrap();
        let mut control = ControlLink::new(writer, signer);
        control.send(LifecycleSignal::Suspend).await.unwrap();

        assert!(matches!(
            next(&mut rx).await,
            ControlEvent::Rejected(ProtocolError::BadTag)
        ));
        assert!(matches!(
            next(&mut rx).await,
            ControlEvent::Signal(LifecycleSignal::Suspend)
        ));
    }

    #[tokio::test]
    async fn cancel_stops_the_reader() {
        let (reader, _writer) = link().await;
        let (_, verifier) = signer_and_verifier(b"session");
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_signals(reader, verifier, tx, cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
