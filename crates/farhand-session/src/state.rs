//! Session state machine and the cell that publishes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::SessionError;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, nothing attempted yet.
    New,
    /// Opening the control connection (client) or waiting for one (server).
    Connecting,
    /// Control connection established, handshake not started.
    Connected,
    /// Running the password handshake.
    Authenticating,
    /// Keys agreed; data and clipboard channels not up yet.
    Authenticated,
    /// Input flows from client to server.
    Running,
    /// Input paused on both sides.
    Suspended,
    /// Shutting down on request.
    Closing,
    /// Shut down cleanly.
    Closed,
    /// Ended by a failure.
    Crashed,
}

impl SessionState {
    /// `Closed` and `Crashed` are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Crashed)
    }

    /// Running or suspended: all three channels are up.
    pub fn is_established(self) -> bool {
        matches!(self, Self::Running | Self::Suspended)
    }

    /// Whether the machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{
            Authenticated, Authenticating, Closed, Closing, Connected, Connecting, Crashed, New,
            Running, Suspended,
        };
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (New, Connecting)
                | (Connecting, Connected)
                | (Connected, Authenticating)
                | (Authenticating, Authenticated)
                | (Authenticated | Suspended, Running)
                | (Running, Suspended | Closing)
                | (Closing, Closed)
                | (_, Crashed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "New",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Authenticating => "Authenticating",
            Self::Authenticated => "Authenticated",
            Self::Running => "Running",
            Self::Suspended => "Suspended",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Crashed => "Crashed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Record {
    state: SessionState,
    history: Vec<SessionState>,
    failure: Option<String>,
}

/// Single owner of a session's state.
///
/// The orchestrator is the only writer. Observers subscribe to the `watch`
/// channel or read snapshots. Every change is validated, appended to the
/// history and published while the record lock is held, so observers see
/// changes in history order.
#[derive(Debug)]
pub struct StateCell {
    record: Mutex<Record>,
    published: watch::Sender<SessionState>,
    recoverable: AtomicBool,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (published, _) = watch::channel(SessionState::New);
        Self {
            record: Mutex::new(Record {
                state: SessionState::New,
                history: vec![SessionState::New],
                failure: None,
            }),
            published,
            recoverable: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.published.subscribe()
    }

    /// Every state the session has been in, oldest first.
    pub fn history(&self) -> Vec<SessionState> {
        self.lock().history.clone()
    }

    /// Whether the session has ever been in `state`.
    pub fn has_reached(&self, state: SessionState) -> bool {
        self.lock().history.contains(&state)
    }

    /// Why the session crashed, if it did.
    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    /// Move to `next`, rejecting moves the machine does not allow.
    pub fn transition(&self, next: SessionState) -> Result<(), SessionError> {
        let mut record = self.lock();
        let from = record.state;
        if !from.can_transition_to(next) {
            return Err(SessionError::InvalidTransition { from, to: next });
        }
        record.state = next;
        record.history.push(next);
        self.published.send_replace(next);
        info!(from = %from, state = %next, "session state changed");
        Ok(())
    }

    /// Move to `Crashed` with `reason`.
    ///
    /// Returns `false` if the session was already terminal, in which case
    /// nothing is published.
    pub fn crash(&self, reason: &SessionError) -> bool {
        let mut record = self.lock();
        if record.state.is_terminal() {
            return false;
        }
        let from = record.state;
        record.state = SessionState::Crashed;
        record.history.push(SessionState::Crashed);
        record.failure = Some(reason.to_string());
        self.published.send_replace(SessionState::Crashed);
        warn!(from = %from, reason = %reason, "session crashed");
        true
    }

    /// Note a dropped control message or failed clipboard exchange.
    pub fn set_recoverable_error(&self) {
        self.recoverable.store(true, Ordering::SeqCst);
    }

    pub fn had_recoverable_error(&self) -> bool {
        self.recoverable.load(Ordering::SeqCst)
    }
}
