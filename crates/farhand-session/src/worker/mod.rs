//! Tasks that run alongside the orchestrator for one session.
//!
//! Workers never retry. A worker that cannot bring up its channel reports
//! through its `Ready` sender; after that, fatal errors go to the
//! orchestrator's failure channel and the worker exits.

use std::net::SocketAddr;
use std::time::Duration;

use farhand_protocol::transport::{self, TcpSecureChannel};
use farhand_protocol::{ChannelKind, ProtocolError, SessionKeys};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

pub mod clipboard;
pub mod control;
pub mod data;

/// Startup acknowledgement sent once a worker's channel is up.
pub(crate) type Ready = oneshot::Sender<Result<(), SessionError>>;

/// Where fatal worker errors go after startup.
pub(crate) type Failures = mpsc::Sender<SessionError>;

/// How a worker obtains its channel.
pub(crate) enum ChannelOrigin {
    /// Client: dial the server and send a join preamble.
    Join {
        server: SocketAddr,
        keys: SessionKeys,
        timeout: Duration,
    },
    /// Server: wait for the rendezvous to hand over a verified join.
    Rendezvous {
        joined: oneshot::Receiver<TcpSecureChannel>,
        timeout: Duration,
    },
}

impl ChannelOrigin {
    pub(crate) async fn open(
        self,
        kind: ChannelKind,
        cancel: &CancellationToken,
    ) -> Result<TcpSecureChannel, SessionError> {
        let open = async move {
            match self {
                Self::Join {
                    server,
                    keys,
                    timeout,
                } => Ok(transport::join_channel(server, &keys, kind, timeout).await?),
                Self::Rendezvous { joined, timeout } => tokio::time::timeout(timeout, joined)
                    .await
                    .map_err(|_| SessionError::Network(ProtocolError::Timeout("waiting for join")))?
                    .map_err(|_| SessionError::StartupFailure(format!("{kind} channel never joined"))),
            }
        };
        tokio::select! {
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            result = open => result,
        }
    }
}

/// Report a fatal error. The orchestrator may already be gone.
pub(crate) async fn report(failures: &Failures, error: SessionError) {
    let _ = failures.send(error).await;
}
