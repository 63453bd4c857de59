//! An input source fed from an in-process channel.
//!
//! Used where events come from somewhere other than a device, such as
//! commands typed into the CLI or a test driving the client.

use async_trait::async_trait;
use farhand_types::InputEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::InputError;
use crate::InputSource;

/// Capacity of the feed channel returned by [`ChannelSource::new`].
pub const FEED_CAPACITY: usize = 1024;

/// Forwards events pushed into its feed to the session.
pub struct ChannelSource {
    feed_rx: Option<mpsc::Receiver<InputEvent>>,
    forwarder: Option<JoinHandle<()>>,
}

impl ChannelSource {
    /// Create a new source and the sender that feeds it.
    pub fn new() -> (Self, mpsc::Sender<InputEvent>) {
        let (feed_tx, feed_rx) = mpsc::channel(FEED_CAPACITY);
        let source = Self {
            feed_rx: Some(feed_rx),
            forwarder: None,
        };
        (source, feed_tx)
    }
}

#[async_trait]
impl InputSource for ChannelSource {
    async fn start(&mut self, tx: mpsc::Sender<InputEvent>) -> Result<(), InputError> {
        let mut feed_rx = self.feed_rx.take().ok_or(InputError::AlreadyStarted)?;
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = feed_rx.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("channel source drained");
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), InputError> {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }
}
