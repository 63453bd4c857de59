//! Mock input backends for testing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use farhand_types::InputEvent;
use tokio::sync::{mpsc, Notify};

use crate::channel::ChannelSource;
use crate::error::InputError;
use crate::{InputSink, InputSource};

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Mock input source for testing.
///
/// Wraps a [`ChannelSource`] and records whether the session stopped it.
pub struct MockSource {
    inner: ChannelSource,
    stopped: Arc<AtomicBool>,
}

impl MockSource {
    /// Create a new mock source and a sender for injecting events.
    pub fn new() -> (Self, mpsc::Sender<InputEvent>) {
        let (inner, feed) = ChannelSource::new();
        let source = Self {
            inner,
            stopped: Arc::new(AtomicBool::new(false)),
        };
        (source, feed)
    }

    /// Shared flag that turns true once `stop()` is called.
    pub fn stopped_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }
}

#[async_trait]
impl InputSource for MockSource {
    async fn start(&mut self, tx: mpsc::Sender<InputEvent>) -> Result<(), InputError> {
        self.inner.start(tx).await
    }

    async fn stop(&mut self) -> Result<(), InputError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.inner.stop().await
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockSinkState {
    injected: Vec<InputEvent>,
    failing: bool,
}

/// Mock input sink that records every injected event.
pub struct MockSink {
    state: Arc<Mutex<MockSinkState>>,
    changed: Arc<Notify>,
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockSinkState::default())),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Get a clonable handle for observing injected events from tests.
    pub fn handle(&self) -> MockSinkHandle {
        MockSinkHandle {
            state: Arc::clone(&self.state),
            changed: Arc::clone(&self.changed),
        }
    }
}

/// Clonable observer handle for `MockSink`.
#[derive(Clone)]
pub struct MockSinkHandle {
    state: Arc<Mutex<MockSinkState>>,
    changed: Arc<Notify>,
}

impl MockSinkHandle {
    /// Make every following injection fail (and not be recorded).
    pub fn set_failing(&self, failing: bool) {
        self.state.lock().unwrap().failing = failing;
    }

    /// Get a snapshot of all injected events.
    pub fn injected(&self) -> Vec<InputEvent> {
        self.state.lock().unwrap().injected.clone()
    }

    /// Wait until at least `count` events were injected, or `timeout` passes.
    ///
    /// Returns the snapshot either way.
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> Vec<InputEvent> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            let snapshot = self.injected();
            if snapshot.len() >= count {
                return snapshot;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.injected();
            }
        }
    }
}

#[async_trait]
impl InputSink for MockSink {
    async fn inject(&self, event: InputEvent) -> Result<(), InputError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.failing {
                return Err(InputError::Inject(format!("mock sink refused {event:?}")));
            }
            state.injected.push(event);
        }
        self.changed.notify_waiters();
        Ok(())
    }
}
