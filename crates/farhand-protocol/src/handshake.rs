//! Password-bound key agreement with mutual key confirmation.
//!
//! Wire exchange (all unencrypted, fixed length):
//!
//! ```text
//! client -> server   X25519 public value   (32 bytes)
//! server -> client   X25519 public value   (32 bytes)
//! both directions    confirmation tag      (32 bytes)
//! ```
//!
//! The key-confirmation key is `SHA-256(shared || password_key)`, where
//! `password_key` is PBKDF2 over the password salted with the server's
//! `address:port`. A peer with a different password derives a different
//! confirmation key and its tag fails to verify.

use std::num::NonZeroU32;

use farhand_types::Role;
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::rand::SystemRandom;
use ring::{digest, hmac, pbkdf2};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::ProtocolError;
use crate::keys::{SessionKeys, TAG_LEN};

/// Length of an X25519 public value.
pub const PUBLIC_KEY_LEN: usize = 32;

/// PBKDF2 rounds applied to the password.
pub const PASSWORD_ITERATIONS: NonZeroU32 = match NonZeroU32::new(10_000) {
    Some(n) => n,
    None => panic!("iteration count must be non-zero"),
};

const SALT_PREFIX: &str = "farhand/v1:";
const CLIENT_DONE: &[u8] = b"ClientDone";
const SERVER_DONE: &[u8] = b"ServerDone";

/// One side of the handshake, ready to run on a fresh connection.
pub struct Handshake {
    role: Role,
    password_key: [u8; digest::SHA256_OUTPUT_LEN],
}

impl Handshake {
    /// Prepare a handshake for `role`.
    ///
    /// `endpoint` is the server's `address:port` as seen on the connection;
    /// both sides must pass the same string.
    pub fn new(role: Role, password: &str, endpoint: &str) -> Self {
        let salt = format!("{SALT_PREFIX}{endpoint}");
        let mut password_key = [0u8; digest::SHA256_OUTPUT_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            PASSWORD_ITERATIONS,
            salt.as_bytes(),
            password.as_bytes(),
            &mut password_key,
        );
        Self { role, password_key }
    }

    /// Run the exchange over `stream` and return the session keys.
    ///
    /// Network errors are returned as-is and never retried.
    pub async fn run<S>(self, stream: &mut S) -> Result<SessionKeys, ProtocolError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(&X25519, &rng)
            .map_err(|_| ProtocolError::AuthFailure("key generation failed".to_string()))?;
        let public = private
            .compute_public_key()
            .map_err(|_| ProtocolError::AuthFailure("key generation failed".to_string()))?;

        let mut peer_public = [0u8; PUBLIC_KEY_LEN];
        match self.role {
            Role::Client => {
                stream.write_all(public.as_ref()).await?;
                stream.flush().await?;
                read_fixed(stream, &mut peer_public, "peer key-agreement value truncated").await?;
            }
            Role::Server => {
                read_fixed(stream, &mut peer_public, "peer key-agreement value truncated").await?;
                stream.write_all(public.as_ref()).await?;
                stream.flush().await?;
            }
        }
        debug!(role = %self.role, "exchanged key-agreement values");

        let password_key = self.password_key;
        let confirmation_secret = agreement::agree_ephemeral(
            private,
            &UnparsedPublicKey::new(&X25519, peer_public),
            |shared| {
                let mut ctx = digest::Context::new(&digest::SHA256);
                ctx.update(shared);
                ctx.update(&password_key);
                ctx.finish()
            },
        )
        .map_err(|_| {
            ProtocolError::AuthFailure("peer sent an invalid key-agreement value".to_string())
        })?;
        let confirmation = hmac::Key::new(hmac::HMAC_SHA256, confirmation_secret.as_ref());

        let (ours, theirs) = match self.role {
            Role::Client => (CLIENT_DONE, SERVER_DONE),
            Role::Server => (SERVER_DONE, CLIENT_DONE),
        };
        let local_tag = hmac::sign(&confirmation, ours);
        stream.write_all(local_tag.as_ref()).await?;
        stream.flush().await?;

        let mut peer_tag = [0u8; TAG_LEN];
        read_fixed(stream, &mut peer_tag, "peer closed before confirming the key").await?;
        hmac::verify(&confirmation, theirs, &peer_tag).map_err(|_| {
            ProtocolError::AuthFailure("key confirmation mismatch (wrong password?)".to_string())
        })?;

        debug!(role = %self.role, "key confirmed");
        Ok(SessionKeys::derive(&confirmation))
    }
}

/// Read exactly `buf.len()` bytes; a short read is an authentication failure.
async fn read_fixed<S>(
    stream: &mut S,
    buf: &mut [u8],
    truncated: &str,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::AuthFailure(truncated.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    const ENDPOINT: &str = "127.0.0.1:24900";

    async fn run_pair(
        client_password: &str,
        server_password: &str,
    ) -> (
        Result<SessionKeys, ProtocolError>,
        Result<SessionKeys, ProtocolError>,
    ) {
        let (mut a, mut b) = duplex(1024);
        let client = Handshake::new(Role::Client, client_password, ENDPOINT);
        let server = Handshake::new(Role::Server, server_password, ENDPOINT);
        tokio::join!(client.run(&mut a), server.run(&mut b))
    }

    #[tokio::test]
    async fn same_password_yields_same_keys() {
        let (client, server) = run_pair("00000", "00000").await;
        let (client, server) = (client.unwrap(), server.unwrap());
        assert_eq!(client.sign(b"Suspend:1"), server.sign(b"Suspend:1"));
        assert_eq!(
            client.channel_key(crate::ChannelKind::Control),
            server.channel_key(crate::ChannelKind::Control)
        );
    }

    #[tokio::test]
    async fn each_run_yields_fresh_keys() {
        let (first, _) = run_pair("00000", "00000").await;
        let (second, _) = run_pair("00000", "00000").await;
        assert_ne!(first.unwrap().sign(b"x"), second.unwrap().sign(b"x"));
    }

    #[tokio::test]
    async fn wrong_password_fails_on_both_sides() {
        let (client, server) = run_pair("00000", "00001").await;
        assert!(matches!(client, Err(ProtocolError::AuthFailure(_))));
        assert!(matches!(server, Err(ProtocolError::AuthFailure(_))));
    }

    #[tokio::test]
    async fn endpoint_is_part_of_the_binding() {
        let (mut a, mut b) = duplex(1024);
        let client = Handshake::new(Role::Client, "00000", "10.0.0.1:1");
        let server = Handshake::new(Role::Server, "00000", "10.0.0.2:1");
        let (client, server) = tokio::join!(client.run(&mut a), server.run(&mut b));
        assert!(client.is_err());
        assert!(server.is_err());
    }

    #[tokio::test]
    async fn truncated_public_value_is_auth_failure() {
        let (mut a, mut b) = duplex(1024);
        let server = tokio::spawn(async move {
            Handshake::new(Role::Server, "00000", ENDPOINT)
                .run(&mut b)
                .await
        });
        a.write_all(&[1u8; 10]).await.unwrap();
        drop(a);
        let result = server.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::AuthFailure(_))));
    }

    #[tokio::test]
    async fn forged_confirmation_tag_is_rejected() {
        let (mut a, mut b) = duplex(1024);
        let server = tokio::spawn(async move {
            Handshake::new(Role::Server, "00000", ENDPOINT)
                .run(&mut b)
                .await
        });

        // A peer that knows no password: valid public value, random tag.
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(&X25519, &rng).unwrap();
        let public = private.compute_public_key().unwrap();
        a.write_all(public.as_ref()).await.unwrap();
        let mut server_public = [0u8; PUBLIC_KEY_LEN];
        a.read_exact(&mut server_public).await.unwrap();
        a.write_all(&[0xAB; TAG_LEN]).await.unwrap();

        let result = server.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::AuthFailure(_))));
    }
}
