//! Clipboard channel worker.
//!
//! Exchanges happen only at lifecycle points, never continuously. Each
//! exchange moves exactly one message in one direction: the client sends
//! on open and resume, the server sends on suspend and close. A message is
//! always sent, so the receiver never waits on a sender that chose to skip.

use farhand_clipboard::ClipboardProvider;
use farhand_protocol::{ChannelKind, ProtocolError, SecureReader, SecureWriter};
use farhand_types::{ClipboardMessage, Role};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ChannelOrigin, Ready};
use crate::config::ClipboardConfig;
use crate::error::SessionError;

/// Lifecycle point at which clipboards are exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exchange {
    Open,
    Suspend,
    Resume,
    Close,
}

impl Exchange {
    /// The side that sends during this exchange.
    pub fn sender(self) -> Role {
        match self {
            Self::Open | Self::Resume => Role::Client,
            Self::Suspend | Self::Close => Role::Server,
        }
    }
}

/// How an exchange went for this side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Our clipboard content went out.
    Sent,
    /// The peer's content was written to our clipboard.
    Received,
    /// Nothing to transfer.
    Empty,
    /// One of the clipboards was busy.
    Busy,
    /// Our clipboard could not be read or written.
    LocalError(String),
}

impl ExchangeOutcome {
    /// Recoverable failures that leave the session running.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Busy | Self::LocalError(_))
    }
}

pub(crate) struct ClipboardJob {
    pub(crate) exchange: Exchange,
    pub(crate) done: oneshot::Sender<Result<ExchangeOutcome, SessionError>>,
}

pub(crate) struct ClipboardWorker {
    role: Role,
    provider: Box<dyn ClipboardProvider>,
    config: ClipboardConfig,
}

impl ClipboardWorker {
    pub(crate) fn new(
        role: Role,
        provider: Box<dyn ClipboardProvider>,
        config: ClipboardConfig,
    ) -> Self {
        Self {
            role,
            provider,
            config,
        }
    }

    /// Bring up the channel, then serve exchange jobs until the job sender
    /// is dropped, `cancel` fires, or an exchange fails.
    pub(crate) async fn run(
        mut self,
        origin: ChannelOrigin,
        mut jobs: mpsc::Receiver<ClipboardJob>,
        ready: Ready,
        cancel: CancellationToken,
    ) {
        let channel = match origin.open(ChannelKind::Clipboard, &cancel).await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        let _ = ready.send(Ok(()));
        debug!("clipboard channel up");

        let (mut reader, mut writer) = channel.into_split();
        loop {
            let job = tokio::select! {
                () = cancel.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let result = tokio::select! {
                () = cancel.cancelled() => Err(SessionError::Cancelled),
                result = self.exchange(job.exchange, &mut reader, &mut writer) => result,
            };
            let failed = result.is_err();
            let _ = job.done.send(result);
            if failed {
                return;
            }
        }
        let _ = writer.shutdown().await;
        debug!("clipboard worker finished");
    }

    pub(crate) async fn exchange<R, W>(
        &mut self,
        exchange: Exchange,
        reader: &mut SecureReader<R>,
        writer: &mut SecureWriter<W>,
    ) -> Result<ExchangeOutcome, SessionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let outcome = if exchange.sender() == self.role {
            self.send(writer).await?
        } else {
            self.receive(reader).await?
        };
        info!(?exchange, ?outcome, "clipboard exchange");
        Ok(outcome)
    }

    async fn send<W>(&mut self, writer: &mut SecureWriter<W>) -> Result<ExchangeOutcome, SessionError>
    where
        W: AsyncWrite + Unpin,
    {
        let (message, outcome) = self.outgoing().await;
        writer.send_message(&message).await?;
        Ok(outcome)
    }

    async fn outgoing(&mut self) -> (ClipboardMessage, ExchangeOutcome) {
        if !self.config.enabled {
            return (ClipboardMessage::Empty, ExchangeOutcome::Empty);
        }
        match self.provider.read().await {
            Ok(Some(content)) if content.size() > self.config.size_limit() => {
                warn!(
                    size = content.size(),
                    max = self.config.size_limit(),
                    "clipboard content too large, not sent"
                );
                (ClipboardMessage::Empty, ExchangeOutcome::Empty)
            }
            Ok(Some(content)) if content.is_empty() => {
                (ClipboardMessage::Empty, ExchangeOutcome::Empty)
            }
            Ok(Some(content)) => (ClipboardMessage::Content(content), ExchangeOutcome::Sent),
            Ok(None) => (ClipboardMessage::Empty, ExchangeOutcome::Empty),
            Err(e) if e.is_busy() => {
                warn!("local clipboard busy");
                (ClipboardMessage::Busy, ExchangeOutcome::Busy)
            }
            Err(e) => {
                warn!(error = %e, "failed to read local clipboard");
                (ClipboardMessage::Empty, ExchangeOutcome::LocalError(e.to_string()))
            }
        }
    }

    async fn receive<R>(
        &mut self,
        reader: &mut SecureReader<R>,
    ) -> Result<ExchangeOutcome, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let message: ClipboardMessage = reader
            .recv_message()
            .await?
            .ok_or(SessionError::Network(ProtocolError::StreamClosed))?;

        let content = match message {
            ClipboardMessage::Empty => return Ok(ExchangeOutcome::Empty),
            ClipboardMessage::Busy => {
                warn!("peer clipboard busy");
                return Ok(ExchangeOutcome::Busy);
            }
            ClipboardMessage::Content(content) => content,
        };
        if !self.config.enabled || content.size() > self.config.size_limit() {
            debug!(size = content.size(), "ignoring received clipboard content");
            return Ok(ExchangeOutcome::Empty);
        }
        match self.provider.write(content).await {
            Ok(()) => Ok(ExchangeOutcome::Received),
            Err(e) if e.is_busy() => {
                warn!("local clipboard busy, received content dropped");
                Ok(ExchangeOutcome::Busy)
            }
            Err(e) => {
                warn!(error = %e, "failed to write local clipboard");
                Ok(ExchangeOutcome::LocalError(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use farhand_clipboard::{MemoryClipboard, MemoryClipboardHandle};
    use farhand_protocol::SecureChannel;
    use farhand_types::ClipboardContent;
    use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};

    use super::*;

    const KEY: [u8; 32] = [3u8; 32];

    type Reader = SecureReader<ReadHalf<DuplexStream>>;
    type Writer = SecureWriter<WriteHalf<DuplexStream>>;

    struct Side {
        worker: ClipboardWorker,
        clipboard: MemoryClipboardHandle,
        reader: Reader,
        writer: Writer,
    }

    impl Side {
        async fn exchange(&mut self, exchange: Exchange) -> ExchangeOutcome {
            self.worker
                .exchange(exchange, &mut self.reader, &mut self.writer)
                .await
                .unwrap()
        }
    }

    async fn sides(config: ClipboardConfig) -> (Side, Side) {
        let (a, b) = duplex(64 * 1024);
        let (a, b) = tokio::join!(SecureChannel::open(a, &KEY), SecureChannel::open(b, &KEY));
        let side = |role, channel: SecureChannel<DuplexStream>| {
            let clipboard = MemoryClipboard::new();
            let handle = clipboard.handle();
            let (reader, writer) = channel.into_split();
            Side {
                worker: ClipboardWorker::new(role, Box::new(clipboard), config.clone()),
                clipboard: handle,
                reader,
                writer,
            }
        };
        (side(Role::Client, a.unwrap()), side(Role::Server, b.unwrap()))
    }

    async fn run(client: &mut Side, server: &mut Side, exchange: Exchange) -> (ExchangeOutcome, ExchangeOutcome) {
        tokio::join!(client.exchange(exchange), server.exchange(exchange))
    }

    #[test]
    fn sender_follows_the_lifecycle_point() {
        assert_eq!(Exchange::Open.sender(), Role::Client);
        assert_eq!(Exchange::Resume.sender(), Role::Client);
        assert_eq!(Exchange::Suspend.sender(), Role::Server);
        assert_eq!(Exchange::Close.sender(), Role::Server);
    }

    #[tokio::test]
    async fn content_moves_in_the_exchange_direction() {
        let (mut client, mut server) = sides(ClipboardConfig::default()).await;
        client.clipboard.set(Some(ClipboardContent::text("from client")));
        server.clipboard.set(Some(ClipboardContent::text("from server")));

        let outcomes = run(&mut client, &mut server, Exchange::Open).await;
        assert_eq!(outcomes, (ExchangeOutcome::Sent, ExchangeOutcome::Received));
        assert_eq!(server.clipboard.get(), Some(ClipboardContent::text("from client")));

        client.clipboard.set(Some(ClipboardContent::text("changed locally")));
        server.clipboard.set(Some(ClipboardContent::text("server copy")));
        let outcomes = run(&mut client, &mut server, Exchange::Suspend).await;
        assert_eq!(outcomes, (ExchangeOutcome::Received, ExchangeOutcome::Sent));
        assert_eq!(client.clipboard.get(), Some(ClipboardContent::text("server copy")));
    }

    #[tokio::test]
    async fn empty_clipboard_sends_empty_and_leaves_peer_alone() {
        let (mut client, mut server) = sides(ClipboardConfig::default()).await;
        server.clipboard.set(Some(ClipboardContent::text("keep me")));

        let outcomes = run(&mut client, &mut server, Exchange::Resume).await;
        assert_eq!(outcomes, (ExchangeOutcome::Empty, ExchangeOutcome::Empty));
        assert_eq!(server.clipboard.get(), Some(ClipboardContent::text("keep me")));
        assert_eq!(server.clipboard.write_count(), 0);
    }

    #[tokio::test]
    async fn busy_sender_is_reported_on_both_sides() {
        let (mut client, mut server) = sides(ClipboardConfig::default()).await;
        server.clipboard.set_busy(true);

        let outcomes = run(&mut client, &mut server, Exchange::Close).await;
        assert_eq!(outcomes, (ExchangeOutcome::Busy, ExchangeOutcome::Busy));
        assert!(outcomes.0.is_degraded());
    }

    #[tokio::test]
    async fn busy_receiver_drops_content() {
        let (mut client, mut server) = sides(ClipboardConfig::default()).await;
        client.clipboard.set(Some(ClipboardContent::text("hello")));
        server.clipboard.set_busy(true);

        let outcomes = run(&mut client, &mut server, Exchange::Open).await;
        assert_eq!(outcomes, (ExchangeOutcome::Sent, ExchangeOutcome::Busy));
        server.clipboard.set_busy(false);
        assert_eq!(server.clipboard.get(), None);
    }

    #[tokio::test]
    async fn oversized_content_is_not_sent() {
        let config = ClipboardConfig {
            enabled: true,
            max_size: 4,
        };
        let (mut client, mut server) = sides(config).await;
        client.clipboard.set(Some(ClipboardContent::text("too long")));

        let outcomes = run(&mut client, &mut server, Exchange::Open).await;
        assert_eq!(outcomes, (ExchangeOutcome::Empty, ExchangeOutcome::Empty));
        assert_eq!(server.clipboard.get(), None);
    }

    #[tokio::test]
    async fn content_larger_than_a_frame_is_not_sent() {
        let config = ClipboardConfig {
            enabled: true,
            max_size: 10 * 1024 * 1024,
        };
        let (mut client, mut server) = sides(config).await;
        let big = "x".repeat(2 * 1024 * 1024);
        client.clipboard.set(Some(ClipboardContent::text(big)));

        let outcomes = run(&mut client, &mut server, Exchange::Open).await;
        assert_eq!(outcomes, (ExchangeOutcome::Empty, ExchangeOutcome::Empty));
        assert_eq!(server.clipboard.get(), None);

        // The channel is still usable afterwards.
        client.clipboard.set(Some(ClipboardContent::text("small")));
        let outcomes = run(&mut client, &mut server, Exchange::Resume).await;
        assert_eq!(outcomes, (ExchangeOutcome::Sent, ExchangeOutcome::Received));
    }

    #[tokio::test]
    async fn disabled_sync_still_completes_the_exchange() {
        let config = ClipboardConfig {
            enabled: false,
            max_size: 1024,
        };
        let (mut client, mut server) = sides(config).await;
        client.clipboard.set(Some(ClipboardContent::text("private")));

        let outcomes = run(&mut client, &mut server, Exchange::Open).await;
        assert_eq!(outcomes, (ExchangeOutcome::Empty, ExchangeOutcome::Empty));
        assert_eq!(server.clipboard.get(), None);
    }

    #[tokio::test]
    async fn peer_gone_is_fatal_for_the_receiver() {
        let (client, mut server) = sides(ClipboardConfig::default()).await;
        drop(client);
        let err = server
            .worker
            .exchange(Exchange::Open, &mut server.reader, &mut server.writer)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Network(_)));
    }
}
