//! Session key material derived by the handshake.

use ring::hmac;

use crate::secure::KEY_LEN;
use crate::transport::ChannelKind;

/// Length of every HMAC-SHA256 tag used by the protocol.
pub const TAG_LEN: usize = 32;

const AUTH_LABEL: &[u8] = b"farhand session auth";

/// Keys for one authenticated session.
///
/// Holds the HMAC key that signs lifecycle signals and channel joins, and a
/// separate cipher key for each of the three channels.
#[derive(Clone)]
pub struct SessionKeys {
    auth: hmac::Key,
    control: [u8; KEY_LEN],
    data: [u8; KEY_LEN],
    clipboard: [u8; KEY_LEN],
}

impl SessionKeys {
    /// Expand the key-confirmation key into the session keys.
    pub(crate) fn derive(confirmation: &hmac::Key) -> Self {
        let auth = hmac::Key::new(
            hmac::HMAC_SHA256,
            hmac::sign(confirmation, AUTH_LABEL).as_ref(),
        );
        Self {
            auth,
            control: expand(confirmation, ChannelKind::Control),
            data: expand(confirmation, ChannelKind::Data),
            clipboard: expand(confirmation, ChannelKind::Clipboard),
        }
    }

    /// Keys from an already shared secret, skipping the handshake.
    ///
    /// Both ends must use the same secret.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::derive(&hmac::Key::new(hmac::HMAC_SHA256, secret))
    }

    /// The session authentication (HMAC) key.
    pub fn auth_key(&self) -> &hmac::Key {
        &self.auth
    }

    /// Cipher key for one channel.
    pub fn channel_key(&self, kind: ChannelKind) -> &[u8; KEY_LEN] {
        match kind {
            ChannelKind::Control => &self.control,
            ChannelKind::Data => &self.data,
            ChannelKind::Clipboard => &self.clipboard,
        }
    }

    /// Tag `data` with the session authentication key.
    pub fn sign(&self, data: &[u8]) -> [u8; TAG_LEN] {
        to_array(hmac::sign(&self.auth, data).as_ref())
    }

    /// Constant-time check of a tag produced by [`SessionKeys::sign`].
    pub fn verify(&self, data: &[u8], tag: &[u8]) -> bool {
        hmac::verify(&self.auth, data, tag).is_ok()
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

fn expand(confirmation: &hmac::Key, kind: ChannelKind) -> [u8; KEY_LEN] {
    let label = format!("farhand cipher {}", kind.label());
    to_array(hmac::sign(confirmation, label.as_bytes()).as_ref())
}

fn to_array(tag: &[u8]) -> [u8; TAG_LEN] {
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag[..TAG_LEN]);
    out
}
