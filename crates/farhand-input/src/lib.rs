//! Input source and sink abstractions for farhand.
//!
//! This crate defines the [`InputSource`] and [`InputSink`] traits that
//! platform backends implement. Capturing and injecting OS input is outside
//! the session engine: the client feeds events from an [`InputSource`], the
//! server hands received events to an [`InputSink`].

use async_trait::async_trait;
use farhand_types::InputEvent;
use tokio::sync::mpsc;

pub mod channel;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;

pub use channel::ChannelSource;
pub use error::InputError;

/// Produces local input events on the controlling machine.
#[async_trait]
pub trait InputSource: Send + 'static {
    /// Start producing events into `tx`.
    ///
    /// The source stops on its own once `tx` is closed.
    async fn start(&mut self, tx: mpsc::Sender<InputEvent>) -> Result<(), InputError>;

    /// Stop producing events and release any grabbed devices.
    async fn stop(&mut self) -> Result<(), InputError>;
}

/// Injects events into the local OS on the controlled machine.
///
/// Takes `&self` so the session can share one sink between its injector
/// task and the cleanup path that releases stuck keys.
#[async_trait]
pub trait InputSink: Send + Sync + 'static {
    async fn inject(&self, event: InputEvent) -> Result<(), InputError>;
}
