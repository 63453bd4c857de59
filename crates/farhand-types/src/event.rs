//! Input event types.
//!
//! Platform-agnostic representations of keyboard and mouse events. Mouse
//! positions are absolute and normalised to `0..=65535` on both axes so the
//! receiving side can map them onto whatever screen it drives.

use serde::{Deserialize, Serialize};

/// A platform-agnostic input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputEvent {
    /// Key press or release.
    Key { code: KeyCode, state: ButtonState },

    /// Mouse activity at an absolute, normalised position.
    Mouse { x: u16, y: u16, action: MouseAction },
}

impl InputEvent {
    /// Key press.
    #[must_use]
    pub fn key_down(code: KeyCode) -> Self {
        Self::Key {
            code,
            state: ButtonState::Pressed,
        }
    }

    /// Key release.
    #[must_use]
    pub fn key_up(code: KeyCode) -> Self {
        Self::Key {
            code,
            state: ButtonState::Released,
        }
    }

    /// Pointer motion to `(x, y)`.
    #[must_use]
    pub fn mouse_move(x: u16, y: u16) -> Self {
        Self::Mouse {
            x,
            y,
            action: MouseAction::Move,
        }
    }
}

/// Button/key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonState {
    Pressed,
    Released,
}

impl ButtonState {
    pub fn is_pressed(self) -> bool {
        self == Self::Pressed
    }
}

/// Virtual key code as reported by the local input source.
///
/// The numbering follows the Windows virtual-key table, which is what most
/// capture backends can produce directly. Backends on other platforms map
/// their native codes onto it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const BACKSPACE: Self = Self(0x08);
    pub const TAB: Self = Self(0x09);
    pub const ENTER: Self = Self(0x0D);
    pub const SHIFT: Self = Self(0x10);
    pub const CONTROL: Self = Self(0x11);
    pub const ALT: Self = Self(0x12);
    pub const ESCAPE: Self = Self(0x1B);
    pub const SPACE: Self = Self(0x20);
    pub const LEFT: Self = Self(0x25);
    pub const UP: Self = Self(0x26);
    pub const RIGHT: Self = Self(0x27);
    pub const DOWN: Self = Self(0x28);
    pub const A: Self = Self(0x41);
    pub const B: Self = Self(0x42);
    pub const C: Self = Self(0x43);
    pub const V: Self = Self(0x56);
    pub const X: Self = Self(0x58);
    pub const Z: Self = Self(0x5A);

    /// Key code for an ASCII letter or digit, if it has one.
    pub fn from_ascii(c: char) -> Option<Self> {
        if !c.is_ascii_alphanumeric() {
            return None;
        }
        u16::try_from(u32::from(c.to_ascii_uppercase()))
            .ok()
            .map(Self)
    }
}

impl std::fmt::Display for KeyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vk:{:#04x}", self.0)
    }
}

/// Mouse button identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

/// What a mouse event does at its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseAction {
    Move,
    Press(MouseButton),
    Release(MouseButton),
    /// Wheel rotation; positive is away from the user.
    Wheel(i16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_helpers() {
        assert_eq!(
            InputEvent::key_down(KeyCode::A),
            InputEvent::Key {
                code: KeyCode::A,
                state: ButtonState::Pressed,
            }
        );
        assert!(!ButtonState::Released.is_pressed());
    }

    #[test]
    fn keycode_from_ascii() {
        assert_eq!(KeyCode::from_ascii('a'), Some(KeyCode::A));
        assert_eq!(KeyCode::from_ascii('B'), Some(KeyCode::B));
        assert_eq!(KeyCode::from_ascii('7'), Some(KeyCode(0x37)));
        assert_eq!(KeyCode::from_ascii('%'), None);
    }

    #[test]
    fn input_event_serde_roundtrip() {
        let event = InputEvent::Mouse {
            x: 100,
            y: 200,
            action: MouseAction::Wheel(-120),
        };
        let json = serde_json::to_string(&event).unwrap();
        let decoded: InputEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, decoded);
    }
}
