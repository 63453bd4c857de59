//! Session engine for farhand.
//!
//! One session links a client (the controlling machine) and a server (the
//! controlled machine) over three encrypted channels: control for signed
//! lifecycle signals, data for input records, and clipboard for content
//! exchanged at lifecycle points. The orchestrator owns the session state
//! and drives it from `New` through `Running`/`Suspended` to `Closed` or
//! `Crashed`.

pub mod config;
pub mod error;
mod orchestrator;
pub mod queue;
pub mod residual;
pub mod session;
pub mod setup;
pub mod state;
mod worker;

pub use config::Config;
pub use error::SessionError;
pub use queue::{InputEventQueue, QueueItem};
pub use residual::ResidualStateTracker;
pub use session::{connect_to_peer, start_listening, ClientBackends, ServerBackends, SessionHandle};
pub use state::SessionState;
pub use worker::clipboard::{Exchange, ExchangeOutcome};
