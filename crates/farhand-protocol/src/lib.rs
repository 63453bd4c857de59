//! Transport layer and wire protocol for farhand.
//!
//! This crate handles the password-authenticated handshake, the encrypted
//! byte channels every session runs on, signed lifecycle signals for the
//! control channel, fixed input records for the data channel, and bincode
//! v2 message framing for the clipboard channel.

pub mod error;
pub mod handshake;
pub mod keys;
pub mod record;
pub mod secure;
pub mod signal;
pub mod transport;
pub mod wire;

pub use error::ProtocolError;
pub use handshake::Handshake;
pub use keys::SessionKeys;
pub use record::{decode_event, encode_event, RECORD_LEN};
pub use secure::{SecureChannel, SecureReader, SecureWriter};
pub use signal::{SignalSigner, SignalVerifier};
pub use transport::{ChannelKind, ChannelRendezvous, TcpSecureChannel};
