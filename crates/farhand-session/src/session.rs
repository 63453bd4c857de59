//! Public entry points and the handle callers keep for a session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use farhand_clipboard::ClipboardProvider;
use farhand_input::{InputSink, InputSource};
use farhand_protocol::transport;
use farhand_types::{LifecycleSignal, Role, SessionId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::SessionError;
use crate::orchestrator::{target_of, Orchestrator, Plan, Request};
use crate::state::{SessionState, StateCell};

/// Local backends for the controlling side.
pub struct ClientBackends {
    pub source: Box<dyn InputSource>,
    pub clipboard: Box<dyn ClipboardProvider>,
}

/// Local backends for the controlled side.
pub struct ServerBackends {
    pub sink: Arc<dyn InputSink>,
    pub clipboard: Box<dyn ClipboardProvider>,
}

/// Start a client session against `address:port`.
///
/// Returns at once; setup runs in the background and its progress is
/// visible through [`SessionHandle::observe_state`].
pub fn connect_to_peer(
    address: &str,
    port: u16,
    password: &str,
    backends: ClientBackends,
    config: Config,
) -> SessionHandle {
    let plan = Plan::Client {
        address: address.to_string(),
        port,
        source: backends.source,
    };
    SessionHandle::spawn(Role::Client, password, config, plan, backends.clipboard, None)
}

/// Bind `local_address:port` and serve one client session there.
///
/// The listener serves exactly one client. It closes once that client's
/// channels are up, or when setup fails, so a server whose session ended
/// must call this again to accept anyone else.
///
/// Binding happens before this returns, so a port conflict is reported
/// here rather than as a crashed session. Port 0 picks a free port; see
/// [`SessionHandle::local_addr`].
pub async fn start_listening(
    local_address: &str,
    port: u16,
    password: &str,
    backends: ServerBackends,
    config: Config,
) -> Result<SessionHandle, SessionError> {
    let listener = transport::bind(local_address, port).await?;
    let local_addr = listener
        .local_addr()
        .map_err(farhand_protocol::ProtocolError::from)?;
    info!(%local_addr, "listening");
    let plan = Plan::Server {
        listener,
        sink: backends.sink,
    };
    Ok(SessionHandle::spawn(
        Role::Server,
        password,
        config,
        plan,
        backends.clipboard,
        Some(local_addr),
    ))
}

/// Handle to a running session.
///
/// Dropping the handle closes the session.
pub struct SessionHandle {
    id: SessionId,
    role: Role,
    cell: Arc<StateCell>,
    requests: mpsc::Sender<Request>,
    stop: CancellationToken,
    local_addr: Option<SocketAddr>,
    driver: Option<JoinHandle<SessionState>>,
}

impl SessionHandle {
    fn spawn(
        role: Role,
        password: &str,
        config: Config,
        plan: Plan,
        clipboard: Box<dyn ClipboardProvider>,
        local_addr: Option<SocketAddr>,
    ) -> Self {
        let id = SessionId::new();
        let cell = Arc::new(StateCell::new());
        let (requests, inbox) = mpsc::channel(8);
        let stop = CancellationToken::new();
        let orchestrator = Orchestrator::new(
            id,
            role,
            password.to_string(),
            config,
            Arc::clone(&cell),
            inbox,
            stop.clone(),
        );
        let driver = tokio::spawn(orchestrator.run(plan, clipboard));
        Self {
            id,
            role,
            cell,
            requests,
            stop,
            local_addr,
            driver: Some(driver),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Address the server is listening on. `None` for clients.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn state(&self) -> SessionState {
        self.cell.state()
    }

    /// Every state the session has been in, oldest first.
    pub fn history(&self) -> Vec<SessionState> {
        self.cell.history()
    }

    /// Why the session crashed, if it did.
    pub fn failure(&self) -> Option<String> {
        self.cell.failure()
    }

    /// Whether a control message was dropped or a clipboard exchange
    /// degraded at some point.
    pub fn had_recoverable_error(&self) -> bool {
        self.cell.had_recoverable_error()
    }

    /// Subscribe to state changes.
    pub fn observe_state(&self) -> watch::Receiver<SessionState> {
        self.cell.subscribe()
    }

    /// Pause input on both sides.
    pub async fn request_suspend(&self) -> Result<(), SessionError> {
        self.request(LifecycleSignal::Suspend).await
    }

    /// Resume input after a suspend.
    pub async fn request_resume(&self) -> Result<(), SessionError> {
        self.request(LifecycleSignal::Resume).await
    }

    /// Close the session cleanly. A session that already closed is fine.
    pub async fn request_close(&self) -> Result<(), SessionError> {
        match self.request(LifecycleSignal::Close).await {
            Err(SessionError::SessionGone) if self.cell.state() == SessionState::Closed => Ok(()),
            other => other,
        }
    }

    /// Give up on a session that is still being set up.
    ///
    /// Before `Running` this ends the session as `Crashed`; afterwards it
    /// behaves like [`SessionHandle::request_close`] without waiting.
    pub fn stop_listening(&self) {
        self.stop.cancel();
    }

    /// Drop the session on the spot, skipping the close handshake.
    ///
    /// The peer sees the connection vanish and crashes. Input still held on
    /// this side is not released.
    pub fn abort(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if self.cell.crash(&SessionError::Aborted) {
            info!(session = %self.id, "session aborted");
        }
    }

    /// Wait until the session has been in `target`, or `timeout` passes.
    pub async fn wait_for(&self, target: SessionState, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.cell.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current == target || self.cell.has_reached(target) {
                return true;
            }
            if current.is_terminal() {
                return false;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return self.cell.has_reached(target),
            }
        }
    }

    /// Wait for the session to end and return its final state.
    pub async fn join(mut self) -> SessionState {
        match self.driver.take() {
            Some(driver) => match driver.await {
                Ok(state) => state,
                Err(_) => SessionState::Crashed,
            },
            None => self.cell.state(),
        }
    }

    async fn request(&self, signal: LifecycleSignal) -> Result<(), SessionError> {
        let state = self.cell.state();
        if state.is_terminal() || state == SessionState::Closing {
            return Err(SessionError::SessionGone);
        }
        if !state.is_established() {
            return Err(SessionError::InvalidTransition {
                from: state,
                to: target_of(signal),
            });
        }
        let (ack, done) = oneshot::channel();
        self.requests
            .send(Request { signal, ack })
            .await
            .map_err(|_| SessionError::SessionGone)?;
        done.await.map_err(|_| SessionError::SessionGone)?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.cell.state())
            .finish_non_exhaustive()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
