//! TCP transport: connect, bind, and channel joins.
//!
//! A session runs three channels over separate TCP connections to the same
//! server port. The first connection is the control channel and carries the
//! handshake. The data and clipboard channels join afterwards by sending a
//! preamble that proves knowledge of the session keys:
//!
//! ```text
//! [1 byte channel code][HMAC-SHA256(auth_key, "join:<code>")]
//! ```
//!
//! On the server a [`ChannelRendezvous`] owns the listener once the
//! handshake is done and hands each verified channel to whoever waits for it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use farhand_types::Role;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::keys::{SessionKeys, TAG_LEN};
use crate::secure::SecureChannel;

/// Length of the join preamble sent on data and clipboard connections.
pub const PREAMBLE_LEN: usize = 1 + TAG_LEN;

/// An encrypted channel over TCP.
pub type TcpSecureChannel = SecureChannel<TcpStream>;

/// The three channels of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Control,
    Data,
    Clipboard,
}

impl ChannelKind {
    /// Name used in key derivation and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Data => "data",
            Self::Clipboard => "clipboard",
        }
    }

    /// Code sent in the join preamble.
    pub fn code(self) -> u8 {
        match self {
            Self::Control => 0,
            Self::Data => 1,
            Self::Clipboard => 2,
        }
    }

    /// Parse a join code. The control channel never joins.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Data),
            2 => Some(Self::Clipboard),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Open a TCP connection to `address:port` within `timeout`.
pub async fn connect(
    address: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, ProtocolError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((address, port)))
        .await
        .map_err(|_| ProtocolError::Timeout("connecting"))?
        .map_err(|e| ProtocolError::Connection(format!("{address}:{port}: {e}")))?;
    stream.set_nodelay(true)?;
    debug!(remote = %address, port, "connected");
    Ok(stream)
}

/// Bind a listener on `address:port`. Port 0 picks a free port.
pub async fn bind(address: &str, port: u16) -> Result<TcpListener, ProtocolError> {
    let listener = TcpListener::bind((address, port))
        .await
        .map_err(|e| ProtocolError::Connection(format!("bind {address}:{port}: {e}")))?;
    info!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}

/// The server's `address:port` as seen from this side of `stream`.
///
/// Both ends derive the same string: the client from the peer address and
/// the server from its local address.
pub fn server_endpoint(stream: &TcpStream, role: Role) -> Result<String, ProtocolError> {
    let addr = match role {
        Role::Client => stream.peer_addr()?,
        Role::Server => stream.local_addr()?,
    };
    Ok(canonical(addr).to_string())
}

fn canonical(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(v4.into(), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

fn join_payload(kind: ChannelKind) -> String {
    format!("join:{}", kind.code())
}

/// Join a session's `kind` channel on the server at `server`.
pub async fn join_channel(
    server: SocketAddr,
    keys: &SessionKeys,
    kind: ChannelKind,
    timeout: Duration,
) -> Result<TcpSecureChannel, ProtocolError> {
    let join = async {
        let mut stream = TcpStream::connect(server).await?;
        stream.set_nodelay(true)?;

        let mut preamble = [0u8; PREAMBLE_LEN];
        preamble[0] = kind.code();
        preamble[1..].copy_from_slice(&keys.sign(join_payload(kind).as_bytes()));
        stream.write_all(&preamble).await?;

        SecureChannel::open(stream, keys.channel_key(kind)).await
    };
    let channel = tokio::time::timeout(timeout, join)
        .await
        .map_err(|_| ProtocolError::Timeout("joining channel"))??;
    debug!(channel = %kind, "joined channel");
    Ok(channel)
}

/// Server-side acceptor for the data and clipboard channels.
///
/// Connections with a bad or duplicate preamble are dropped with a warning.
/// Dropping the rendezvous stops the accept loop and closes the listener.
pub struct ChannelRendezvous {
    task: JoinHandle<()>,
    waiters: HashMap<ChannelKind, oneshot::Receiver<TcpSecureChannel>>,
}

impl ChannelRendezvous {
    /// Take over `listener` and start accepting joins for this session.
    pub fn spawn(listener: TcpListener, keys: SessionKeys, join_timeout: Duration) -> Self {
        let mut senders = HashMap::new();
        let mut waiters = HashMap::new();
        for kind in [ChannelKind::Data, ChannelKind::Clipboard] {
            let (tx, rx) = oneshot::channel();
            senders.insert(kind, tx);
            waiters.insert(kind, rx);
        }
        let task = tokio::spawn(accept_joins(listener, keys, join_timeout, senders));
        Self { task, waiters }
    }

    /// Take the receiver for `kind`. Each kind can be taken once.
    pub fn take(&mut self, kind: ChannelKind) -> Option<oneshot::Receiver<TcpSecureChannel>> {
        self.waiters.remove(&kind)
    }
}

impl Drop for ChannelRendezvous {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_joins(
    listener: TcpListener,
    keys: SessionKeys,
    join_timeout: Duration,
    mut senders: HashMap<ChannelKind, oneshot::Sender<TcpSecureChannel>>,
) {
    let mut pending = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    debug!(remote = %remote, "join connection");
                    pending.spawn(verify_join(stream, remote, keys.clone(), join_timeout));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some(joined) = pending.join_next(), if !pending.is_empty() => match joined {
                Ok(Ok((kind, remote, channel))) => match senders.remove(&kind) {
                    Some(tx) => {
                        info!(channel = %kind, remote = %remote, "channel joined");
                        // The waiter may be gone if the session already ended.
                        let _ = tx.send(channel);
                    }
                    None => warn!(channel = %kind, remote = %remote, "duplicate join ignored"),
                },
                Ok(Err((remote, e))) => warn!(remote = %remote, error = %e, "rejected join"),
                Err(e) => warn!(error = %e, "join task failed"),
            },
        }
    }
}

async fn verify_join(
    mut stream: TcpStream,
    remote: SocketAddr,
    keys: SessionKeys,
    join_timeout: Duration,
) -> Result<(ChannelKind, SocketAddr, TcpSecureChannel), (SocketAddr, ProtocolError)> {
    let verify = async {
        stream.set_nodelay(true)?;
        let mut preamble = [0u8; PREAMBLE_LEN];
        stream.read_exact(&mut preamble).await?;

        let kind = ChannelKind::from_code(preamble[0]).ok_or_else(|| {
            ProtocolError::AuthFailure(format!("unknown channel code {}", preamble[0]))
        })?;
        if !keys.verify(join_payload(kind).as_bytes(), &preamble[1..]) {
            return Err(ProtocolError::AuthFailure(format!(
                "{kind} join not signed by this session"
            )));
        }
        let channel = SecureChannel::open(stream, keys.channel_key(kind)).await?;
        Ok((kind, channel))
    };
    match tokio::time::timeout(join_timeout, verify).await {
        Ok(Ok((kind, channel))) => Ok((kind, remote, channel)),
        Ok(Err(e)) => Err((remote, e)),
        Err(_) => Err((remote, ProtocolError::Timeout("reading join preamble"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_back_to_joinable_kinds() {
        assert_eq!(ChannelKind::from_code(ChannelKind::Data.code()), Some(ChannelKind::Data));
        assert_eq!(
            ChannelKind::from_code(ChannelKind::Clipboard.code()),
            Some(ChannelKind::Clipboard)
        );
        assert_eq!(ChannelKind::from_code(ChannelKind::Control.code()), None);
        assert_eq!(ChannelKind::from_code(99), None);
    }

    #[test]
    fn mapped_ipv6_is_reported_as_ipv4() {
        let mapped: SocketAddr = "[::ffff:127.0.0.1]:24900".parse().unwrap();
        assert_eq!(canonical(mapped).to_string(), "127.0.0.1:24900");
        let v6: SocketAddr = "[::1]:24900".parse().unwrap();
        assert_eq!(canonical(v6), v6);
    }

    #[tokio::test]
    async fn both_ends_agree_on_the_endpoint() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, accepted) = tokio::join!(
            connect("127.0.0.1", port, Duration::from_secs(5)),
            listener.accept()
        );
        let client = client.unwrap();
        let (server, _) = accepted.unwrap();
        assert_eq!(
            server_endpoint(&client, Role::Client).unwrap(),
            server_endpoint(&server, Role::Server).unwrap()
        );
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = connect("127.0.0.1", port, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
