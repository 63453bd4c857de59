//! Tracks keys and buttons held down on the injecting side.
//!
//! When the event stream is interrupted (suspend, close, crash) the
//! tracker yields one release per key or button still down, so the local
//! OS is never left with a stuck key.

use std::collections::BTreeSet;

use farhand_types::{ButtonState, InputEvent, KeyCode, MouseAction, MouseButton};

#[derive(Debug, Default)]
pub struct ResidualStateTracker {
    keys: BTreeSet<KeyCode>,
    buttons: BTreeSet<MouseButton>,
    /// Last known pointer position, used for synthesised button releases.
    pointer: (u16, u16),
}

impl ResidualStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event` as having been injected.
    pub fn observe(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::Key {
                code,
                state: ButtonState::Pressed,
            } => {
                self.keys.insert(code);
            }
            InputEvent::Key {
                code,
                state: ButtonState::Released,
            } => {
                self.keys.remove(&code);
            }
            InputEvent::Mouse { x, y, action } => {
                self.pointer = (x, y);
                match action {
                    MouseAction::Press(button) => {
                        self.buttons.insert(button);
                    }
                    MouseAction::Release(button) => {
                        self.buttons.remove(&button);
                    }
                    MouseAction::Move | MouseAction::Wheel(_) => {}
                }
            }
        }
    }

    /// Releases for everything still down, keys first, then clear.
    pub fn flush(&mut self) -> Vec<InputEvent> {
        let (x, y) = self.pointer;
        let keys = std::mem::take(&mut self.keys)
            .into_iter()
            .map(InputEvent::key_up);
        let buttons = std::mem::take(&mut self.buttons)
            .into_iter()
            .map(|button| InputEvent::Mouse {
                x,
                y,
                action: MouseAction::Release(button),
            });
        keys.chain(buttons).collect()
    }
}
