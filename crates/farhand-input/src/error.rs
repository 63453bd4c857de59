//! Input backend errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InputError {
    /// `start` was called on a source that is already producing.
    #[error("input source already started")]
    AlreadyStarted,

    /// The OS refused an event. The session logs this and carries on.
    #[error("failed to inject event: {0}")]
    Inject(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
