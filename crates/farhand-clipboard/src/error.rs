//! Clipboard backend errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Another process holds the clipboard. Only the current exchange is lost.
    #[error("clipboard is busy")]
    Busy,

    /// The clipboard holds something this backend cannot represent.
    #[error("clipboard format not supported by this backend")]
    FormatUnavailable,

    #[error("no clipboard available on this system")]
    Unavailable,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClipboardError {
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}
