//! In-process clipboard.
//!
//! Stands in for the OS clipboard in tests and headless runs. A handle can
//! inspect the content and mark the clipboard busy to simulate another
//! process holding it.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use farhand_types::ClipboardContent;
use tracing::trace;

use crate::error::ClipboardError;
use crate::ClipboardProvider;

#[derive(Debug, Default)]
struct Slot {
    content: Option<ClipboardContent>,
    busy: bool,
    writes: usize,
}

/// Clipboard stored in memory.
#[derive(Default)]
pub struct MemoryClipboard {
    slot: Arc<Mutex<Slot>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clipboard that starts out holding `content`.
    pub fn with_content(content: ClipboardContent) -> Self {
        let clipboard = Self::new();
        clipboard.handle().set(Some(content));
        clipboard
    }

    /// Get a clonable handle for observing and steering the clipboard.
    pub fn handle(&self) -> MemoryClipboardHandle {
        MemoryClipboardHandle {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Clonable handle onto a [`MemoryClipboard`].
#[derive(Clone)]
pub struct MemoryClipboardHandle {
    slot: Arc<Mutex<Slot>>,
}

impl MemoryClipboardHandle {
    pub fn get(&self) -> Option<ClipboardContent> {
        lock(&self.slot).content.clone()
    }

    pub fn set(&self, content: Option<ClipboardContent>) {
        lock(&self.slot).content = content;
    }

    /// While busy, every read and write fails with [`ClipboardError::Busy`].
    pub fn set_busy(&self, busy: bool) {
        lock(&self.slot).busy = busy;
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        lock(&self.slot).writes
    }
}

fn lock(slot: &Mutex<Slot>) -> std::sync::MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ClipboardProvider for MemoryClipboard {
    async fn read(&mut self) -> Result<Option<ClipboardContent>, ClipboardError> {
        let slot = lock(&self.slot);
        if slot.busy {
            return Err(ClipboardError::Busy);
        }
        Ok(slot.content.clone())
    }

    async fn write(&mut self, content: ClipboardContent) -> Result<(), ClipboardError> {
        let mut slot = lock(&self.slot);
        if slot.busy {
            return Err(ClipboardError::Busy);
        }
        trace!(size = content.size(), "memory clipboard written");
        slot.content = Some(content);
        slot.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let mut clipboard = MemoryClipboard::new();
        assert_eq!(clipboard.read().await.unwrap(), None);

        clipboard.write(ClipboardContent::text("abc")).await.unwrap();
        let content = clipboard.read().await.unwrap().unwrap();
        assert_eq!(content.as_text(), Some("abc"));
        assert_eq!(clipboard.handle().write_count(), 1);
    }

    #[tokio::test]
    async fn busy_blocks_both_directions() {
        let mut clipboard = MemoryClipboard::with_content(ClipboardContent::text("kept"));
        let handle = clipboard.handle();
        handle.set_busy(true);

        assert!(clipboard.read().await.unwrap_err().is_busy());
        assert!(clipboard
            .write(ClipboardContent::text("lost"))
            .await
            .unwrap_err()
            .is_busy());

        handle.set_busy(false);
        assert_eq!(handle.get().unwrap().as_text(), Some("kept"));
        assert_eq!(handle.write_count(), 0);
    }
}
