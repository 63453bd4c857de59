//! Local clipboard access for farhand.
//!
//! Defines the [`ClipboardProvider`] trait the session's clipboard worker
//! reads from and writes to, an in-memory provider, and (with the `system`
//! feature) an arboard-backed provider for the real OS clipboard.

use async_trait::async_trait;
use farhand_types::ClipboardContent;

pub mod error;
pub mod memory;
#[cfg(feature = "system")]
pub mod system;

pub use error::ClipboardError;
pub use memory::{MemoryClipboard, MemoryClipboardHandle};
#[cfg(feature = "system")]
pub use system::SystemClipboard;

/// Platform clipboard access.
#[async_trait]
pub trait ClipboardProvider: Send + 'static {
    /// Read the current clipboard content. `None` means the clipboard is empty.
    async fn read(&mut self) -> Result<Option<ClipboardContent>, ClipboardError>;

    /// Replace the clipboard content.
    async fn write(&mut self, content: ClipboardContent) -> Result<(), ClipboardError>;
}
