//! Lifecycle signals and session roles.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A lifecycle command carried on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleSignal {
    Suspend,
    Resume,
    Close,
}

impl LifecycleSignal {
    /// ASCII name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Suspend => "Suspend",
            Self::Resume => "Resume",
            Self::Close => "Close",
        }
    }
}

impl std::fmt::Display for LifecycleSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown lifecycle signal: {0:?}")]
pub struct UnknownSignal(pub String);

impl FromStr for LifecycleSignal {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Suspend" => Ok(Self::Suspend),
            "Resume" => Ok(Self::Resume),
            "Close" => Ok(Self::Close),
            other => Err(UnknownSignal(other.to_string())),
        }
    }
}

/// Which end of a session this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Captures local input and drives the remote host.
    Client,
    /// Accepts a client and injects its input locally.
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}
