//! Signed lifecycle messages for the control channel.
//!
//! A control frame is `tag || payload` where `payload` is the ASCII text
//! `<Signal>:<token>` and `tag = HMAC-SHA256(auth_key, payload)`. The token
//! is a microsecond timestamp that strictly increases per sender; the
//! receiver rejects any token not greater than the last one it accepted.

use std::time::{SystemTime, UNIX_EPOCH};

use farhand_types::LifecycleSignal;

use crate::error::ProtocolError;
use crate::keys::{SessionKeys, TAG_LEN};

/// Produces signed control frames.
pub struct SignalSigner {
    keys: SessionKeys,
    last_token: u64,
}

impl SignalSigner {
    pub fn new(keys: SessionKeys) -> Self {
        Self {
            keys,
            last_token: 0,
        }
    }

    /// Encode and sign `signal` with a fresh token.
    pub fn sign(&mut self, signal: LifecycleSignal) -> Vec<u8> {
        let token = now_micros().max(self.last_token.saturating_add(1));
        self.last_token = token;

        let payload = format!("{signal}:{token}");
        let tag = self.keys.sign(payload.as_bytes());

        let mut frame = Vec::with_capacity(TAG_LEN + payload.len());
        frame.extend_from_slice(&tag);
        frame.extend_from_slice(payload.as_bytes());
        frame
    }
}

/// Checks signed control frames from the peer.
pub struct SignalVerifier {
    keys: SessionKeys,
    last_token: Option<u64>,
}

impl SignalVerifier {
    pub fn new(keys: SessionKeys) -> Self {
        Self {
            keys,
            last_token: None,
        }
    }

    /// Authenticate and parse one control frame.
    ///
    /// The freshness token only advances when the frame is accepted.
    pub fn verify(&mut self, frame: &[u8]) -> Result<LifecycleSignal, ProtocolError> {
        if frame.len() <= TAG_LEN {
            return Err(ProtocolError::MalformedSignal(format!(
                "frame of {} bytes is too short",
                frame.len()
            )));
        }
        let (tag, payload) = frame.split_at(TAG_LEN);
        if !self.keys.verify(payload, tag) {
            return Err(ProtocolError::BadTag);
        }

        let text = std::str::from_utf8(payload)
            .map_err(|_| ProtocolError::MalformedSignal("payload is not ASCII".to_string()))?;
        let (name, token) = text
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedSignal(format!("missing token in {text:?}")))?;
        let signal: LifecycleSignal = name
            .parse()
            .map_err(|e: farhand_types::UnknownSignal| ProtocolError::MalformedSignal(e.to_string()))?;
        let token: u64 = token
            .parse()
            .map_err(|_| ProtocolError::MalformedSignal(format!("bad token {token:?}")))?;

        if let Some(last) = self.last_token {
            if token <= last {
                return Err(ProtocolError::Replay {
                    received: token,
                    last,
                });
            }
        }
        self.last_token = Some(token);
        Ok(signal)
    }
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::hmac;

    fn keys(secret: &[u8]) -> SessionKeys {
        SessionKeys::derive(&hmac::Key::new(hmac::HMAC_SHA256, secret))
    }

    #[test]
    fn signed_signal_verifies() {
        let mut signer = SignalSigner::new(keys(b"k"));
        let mut verifier = SignalVerifier::new(keys(b"k"));
        for signal in [
            LifecycleSignal::Suspend,
            LifecycleSignal::Resume,
            LifecycleSignal::Close,
        ] {
            let frame = signer.sign(signal);
            assert_eq!(verifier.verify(&frame).unwrap(), signal);
        }
    }

    #[test]
    fn payload_is_ascii_name_and_token() {
        let mut signer = SignalSigner::new(keys(b"k"));
        let frame = signer.sign(LifecycleSignal::Suspend);
        let payload = std::str::from_utf8(&frame[TAG_LEN..]).unwrap();
        let (name, token) = payload.split_once(':').unwrap();
        assert_eq!(name, "Suspend");
        assert!(token.parse::<u64>().unwrap() > 0);
    }

    #[test]
    fn tokens_strictly_increase() {
        let mut signer = SignalSigner::new(keys(b"k"));
        let token = |frame: &[u8]| -> u64 {
            let payload = std::str::from_utf8(&frame[TAG_LEN..]).unwrap();
            payload.split_once(':').unwrap().1.parse().unwrap()
        };
        let a = token(&signer.sign(LifecycleSignal::Suspend));
        let b = token(&signer.sign(LifecycleSignal::Resume));
        let c = token(&signer.sign(LifecycleSignal::Suspend));
        assert!(a < b && b < c);
    }

    #[test]
    fn exhausted_token_saturates() {
        let mut signer = SignalSigner::new(keys(b"k"));
        signer.last_token = u64::MAX;
        let frame = signer.sign(LifecycleSignal::Close);
        let payload = std::str::from_utf8(&frame[TAG_LEN..]).unwrap();
        assert_eq!(payload, format!("Close:{}", u64::MAX));
        assert_eq!(signer.last_token, u64::MAX);
    }

    #[test]
    fn foreign_key_is_rejected() {
        let mut signer = SignalSigner::new(keys(b"attacker"));
        let mut verifier = SignalVerifier::new(keys(b"session"));
        let frame = signer.sign(LifecycleSignal::Close);
        assert!(matches!(verifier.verify(&frame), Err(ProtocolError::BadTag)));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let mut signer = SignalSigner::new(keys(b"k"));
        let mut verifier = SignalVerifier::new(keys(b"k"));
        let mut frame = signer.sign(LifecycleSignal::Suspend);
        let payload = format!("Close:{}", u64::MAX);
        frame.truncate(TAG_LEN);
        frame.extend_from_slice(payload.as_bytes());
        assert!(matches!(verifier.verify(&frame), Err(ProtocolError::BadTag)));
    }

    #[test]
    fn replayed_frame_is_rejected() {
        let mut signer = SignalSigner::new(keys(b"k"));
        let mut verifier = SignalVerifier::new(keys(b"k"));
        let first = signer.sign(LifecycleSignal::Suspend);
        let second = signer.sign(LifecycleSignal::Resume);

        verifier.verify(&first).unwrap();
        verifier.verify(&second).unwrap();
        assert!(matches!(
            verifier.verify(&first),
            Err(ProtocolError::Replay { .. })
        ));
    }

    #[test]
    fn rejected_frame_does_not_advance_token() {
        let k = keys(b"k");
        let mut signer = SignalSigner::new(k.clone());
        let mut verifier = SignalVerifier::new(k.clone());

        // Correctly signed but unknown signal name with a huge token.
        let payload = format!("Reboot:{}", u64::MAX);
        let mut bogus = k.sign(payload.as_bytes()).to_vec();
        bogus.extend_from_slice(payload.as_bytes());
        assert!(matches!(
            verifier.verify(&bogus),
            Err(ProtocolError::MalformedSignal(_))
        ));

        let frame = signer.sign(LifecycleSignal::Resume);
        assert_eq!(verifier.verify(&frame).unwrap(), LifecycleSignal::Resume);
    }

    #[test]
    fn short_and_unparseable_frames_are_malformed() {
        let k = keys(b"k");
        let mut verifier = SignalVerifier::new(k.clone());
        assert!(matches!(
            verifier.verify(&[0u8; TAG_LEN]),
            Err(ProtocolError::MalformedSignal(_))
        ));

        for payload in ["Suspend", "Suspend:abc", "Suspend:-1"] {
            let mut frame = k.sign(payload.as_bytes()).to_vec();
            frame.extend_from_slice(payload.as_bytes());
            assert!(
                matches!(verifier.verify(&frame), Err(ProtocolError::MalformedSignal(_))),
                "payload {payload:?} should be malformed"
            );
        }
    }
}
