//! What travels over the clipboard channel.

use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Kind of payload held by a [`ClipboardContent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum ClipboardFormat {
    /// UTF-8 text.
    PlainText,
    Html,
    Png,
}

impl ClipboardFormat {
    pub fn mime(self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Html => "text/html",
            Self::Png => "image/png",
        }
    }
}

/// One clipboard snapshot: raw bytes tagged with their format.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ClipboardContent {
    pub format: ClipboardFormat,
    pub data: Vec<u8>,
}

impl ClipboardContent {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            format: ClipboardFormat::PlainText,
            data: text.into().into_bytes(),
        }
    }

    /// The payload as text, if it is plain text and valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self.format {
            ClipboardFormat::PlainText => std::str::from_utf8(&self.data).ok(),
            ClipboardFormat::Html | ClipboardFormat::Png => None,
        }
    }

    /// Payload size in bytes, compared against the configured maximum.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Clipboard bytes are user data; logs only get the shape.
impl fmt::Debug for ClipboardContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClipboardContent({self})")
    }
}

impl fmt::Display for ClipboardContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {} bytes", self.format.mime(), self.data.len())
    }
}
