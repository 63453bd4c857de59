//! Bounded FIFO between input producers and the data channel.
//!
//! Used on both ends: on the client the input source fills it and the data
//! sender drains it, on the server the data reader fills it and the injector
//! drains it. Lifecycle changes reach the consumer as sentinel items, which
//! is the consumer's only wake source besides new events.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use farhand_types::InputEvent;
use tokio::sync::Notify;
use tracing::trace;

use crate::state::SessionState;

/// One item handed to the queue consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItem {
    Event(InputEvent),
    /// The session moved to this state (`Suspended` or `Closed`).
    Lifecycle(SessionState),
}

#[derive(Debug)]
struct Inner {
    items: VecDeque<QueueItem>,
    discard: bool,
    closed: bool,
}

/// Input event queue with discard mode and lifecycle sentinels.
///
/// Content and the discard flag live under one lock, so a sentinel can
/// never be overtaken by an event that was put concurrently.
#[derive(Debug)]
pub struct InputEventQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
}

impl InputEventQueue {
    /// Create an enabled queue holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                discard: false,
                closed: false,
            }),
            capacity: capacity.max(1),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `event`, waiting for space if the queue is full.
    ///
    /// Returns `false` if the event was dropped because the queue is
    /// discarding or closed.
    pub async fn put(&self, event: InputEvent) -> bool {
        loop {
            let space = self.writable.notified();
            {
                let mut inner = self.lock();
                if inner.closed || inner.discard {
                    trace!(?event, "event discarded");
                    return false;
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(QueueItem::Event(event));
                    self.readable.notify_waiters();
                    return true;
                }
            }
            space.await;
        }
    }

    /// Take the next item, waiting until one is available.
    pub async fn get(&self) -> QueueItem {
        loop {
            let ready = self.readable.notified();
            if let Some(item) = self.lock().items.pop_front() {
                self.writable.notify_waiters();
                return item;
            }
            ready.await;
        }
    }

    /// Drop buffered events, enqueue a `Suspended` sentinel and start
    /// discarding. No effect once closed.
    pub fn clear_and_suspend(&self) {
        self.replace_with_sentinel(SessionState::Suspended, false);
    }

    /// Drop buffered events and enqueue a `Closed` sentinel. The queue never
    /// delivers events again. Repeated calls add no further sentinel.
    pub fn clear_and_close(&self) {
        self.replace_with_sentinel(SessionState::Closed, true);
    }

    fn replace_with_sentinel(&self, state: SessionState, close: bool) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            let dropped = inner.items.len();
            inner.items.clear();
            inner.items.push_back(QueueItem::Lifecycle(state));
            inner.discard = true;
            inner.closed = close;
            trace!(dropped, sentinel = %state, "queue cleared");
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    /// Leave discard mode. No effect once closed.
    pub fn enable(&self) {
        let mut inner = self.lock();
        if !inner.closed {
            inner.discard = false;
        }
    }

    /// Enter discard mode without touching queued items.
    pub fn disable(&self) {
        self.lock().discard = true;
    }

    pub fn is_discarding(&self) -> bool {
        self.lock().discard
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use farhand_types::KeyCode;

    use super::*;

    fn key(n: u16) -> InputEvent {
        InputEvent::key_down(KeyCode(n))
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = InputEventQueue::new(64);
        for n in 0..50 {
            assert!(queue.put(key(n)).await);
        }
        for n in 0..50 {
            assert_eq!(queue.get().await, QueueItem::Event(key(n)));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn discarded_events_never_come_back() {
        let queue = InputEventQueue::new(8);
        queue.disable();
        for n in 0..20 {
            assert!(!queue.put(key(n)).await);
        }
        assert!(queue.is_empty());

        queue.enable();
        assert!(queue.is_empty());
        assert!(queue.put(key(99)).await);
        assert_eq!(queue.get().await, QueueItem::Event(key(99)));
    }

    #[tokio::test]
    async fn disable_keeps_queued_items() {
        let queue = InputEventQueue::new(8);
        queue.put(key(1)).await;
        queue.disable();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, QueueItem::Event(key(1)));
    }

    #[tokio::test]
    async fn sentinel_comes_next() {
        let queue = InputEventQueue::new(128);
        for n in 0..100 {
            queue.put(key(n)).await;
        }
        queue.clear_and_suspend();
        assert_eq!(
            queue.get().await,
            QueueItem::Lifecycle(SessionState::Suspended)
        );
        assert!(queue.is_discarding());
        assert!(!queue.put(key(1)).await);

        queue.enable();
        queue.put(key(2)).await;
        queue.clear_and_close();
        assert_eq!(queue.get().await, QueueItem::Lifecycle(SessionState::Closed));
    }

    #[tokio::test]
    async fn blocked_get_wakes_on_sentinel() {
        let queue = Arc::new(InputEventQueue::new(8));
        let consumer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.get().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.clear_and_close();
        let item = tokio::time::timeout(Duration::from_secs(5), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item, QueueItem::Lifecycle(SessionState::Closed));
    }

    #[tokio::test]
    async fn closed_queue_is_terminal() {
        let queue = InputEventQueue::new(8);
        queue.clear_and_close();
        queue.enable();
        assert!(queue.is_closed());
        assert!(!queue.put(key(1)).await);

        // A second close or a suspend adds nothing.
        queue.clear_and_close();
        queue.clear_and_suspend();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn full_queue_waits_for_space() {
        let queue = Arc::new(InputEventQueue::new(2));
        queue.put(key(1)).await;
        queue.put(key(2)).await;

        let producer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.put(key(3)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.get().await, QueueItem::Event(key(1)));
        assert!(tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .unwrap()
            .unwrap());
        assert_eq!(queue.get().await, QueueItem::Event(key(2)));
        assert_eq!(queue.get().await, QueueItem::Event(key(3)));
    }

    #[tokio::test]
    async fn full_producer_is_released_by_close() {
        let queue = Arc::new(InputEventQueue::new(1));
        queue.put(key(1)).await;
        let producer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.put(key(2)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.clear_and_close();
        assert!(!tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .unwrap()
            .unwrap());
    }
}
