//! Messages exchanged on the clipboard channel.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::clipboard::ClipboardContent;

/// One clipboard hand-off from the sending side.
///
/// Every exchange is exactly one message, so both peers stay in step even
/// when the sender has nothing to offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ClipboardMessage {
    /// Clipboard payload.
    Content(ClipboardContent),
    /// Nothing to transfer (empty clipboard, too large, or sync disabled).
    Empty,
    /// The sender's clipboard was locked by another process.
    Busy,
}
