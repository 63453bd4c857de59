//! Shared types for farhand.
//!
//! This crate contains the types shared across the farhand workspace:
//! input events, clipboard content, lifecycle signals, roles, and session
//! identifiers.

pub mod clipboard;
pub mod event;
pub mod lifecycle;
pub mod message;
pub mod session;

pub use clipboard::{ClipboardContent, ClipboardFormat};
pub use event::{ButtonState, InputEvent, KeyCode, MouseAction, MouseButton};
pub use lifecycle::{LifecycleSignal, Role, UnknownSignal};
pub use message::ClipboardMessage;
pub use session::SessionId;
