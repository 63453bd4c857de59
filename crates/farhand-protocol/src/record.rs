//! Fixed-size binary records for the data channel.
//!
//! Every input event is exactly [`RECORD_LEN`] bytes, big endian:
//!
//! ```text
//! keyboard: [0]=1  [1..3]=key code  [3]=1 pressed / 0 released  [4..12]=0
//! mouse:    [0]=2  [1..3]=x  [3..5]=y  [5]=action  [6]=button  [7..9]=wheel (i16)  [9..12]=0
//! ```
//!
//! Mouse actions: 0 move, 1 press, 2 release, 3 wheel. Buttons: 1 left,
//! 2 right, 3 middle, 4 back, 5 forward (0 when the action has none).

use farhand_types::{ButtonState, InputEvent, KeyCode, MouseAction, MouseButton};

use crate::error::ProtocolError;

/// Size of one encoded input event.
pub const RECORD_LEN: usize = 12;

const TAG_KEY: u8 = 1;
const TAG_MOUSE: u8 = 2;

const ACTION_MOVE: u8 = 0;
const ACTION_PRESS: u8 = 1;
const ACTION_RELEASE: u8 = 2;
const ACTION_WHEEL: u8 = 3;

/// Encode one event into its fixed record.
pub fn encode_event(event: &InputEvent) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    match *event {
        InputEvent::Key { code, state } => {
            record[0] = TAG_KEY;
            record[1..3].copy_from_slice(&code.0.to_be_bytes());
            record[3] = u8::from(state.is_pressed());
        }
        InputEvent::Mouse { x, y, action } => {
            record[0] = TAG_MOUSE;
            record[1..3].copy_from_slice(&x.to_be_bytes());
            record[3..5].copy_from_slice(&y.to_be_bytes());
            let (action, button, wheel) = match action {
                MouseAction::Move => (ACTION_MOVE, 0, 0),
                MouseAction::Press(button) => (ACTION_PRESS, button_code(button), 0),
                MouseAction::Release(button) => (ACTION_RELEASE, button_code(button), 0),
                MouseAction::Wheel(delta) => (ACTION_WHEEL, 0, delta),
            };
            record[5] = action;
            record[6] = button;
            record[7..9].copy_from_slice(&wheel.to_be_bytes());
        }
    }
    record
}

/// Decode one record. Errors mean the record should be skipped.
pub fn decode_event(record: &[u8; RECORD_LEN]) -> Result<InputEvent, ProtocolError> {
    match record[0] {
        TAG_KEY => {
            let code = KeyCode(u16::from_be_bytes([record[1], record[2]]));
            let state = match record[3] {
                1 => ButtonState::Pressed,
                0 => ButtonState::Released,
                other => return Err(malformed(format!("key state {other}"))),
            };
            Ok(InputEvent::Key { code, state })
        }
        TAG_MOUSE => {
            let x = u16::from_be_bytes([record[1], record[2]]);
            let y = u16::from_be_bytes([record[3], record[4]]);
            let action = match record[5] {
                ACTION_MOVE => MouseAction::Move,
                ACTION_PRESS => MouseAction::Press(decode_button(record[6])?),
                ACTION_RELEASE => MouseAction::Release(decode_button(record[6])?),
                ACTION_WHEEL => MouseAction::Wheel(i16::from_be_bytes([record[7], record[8]])),
                other => return Err(malformed(format!("mouse action {other}"))),
            };
            Ok(InputEvent::Mouse { x, y, action })
        }
        other => Err(malformed(format!("event tag {other}"))),
    }
}

fn button_code(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 1,
        MouseButton::Right => 2,
        MouseButton::Middle => 3,
        MouseButton::Back => 4,
        MouseButton::Forward => 5,
    }
}

fn decode_button(code: u8) -> Result<MouseButton, ProtocolError> {
    match code {
        1 => Ok(MouseButton::Left),
        2 => Ok(MouseButton::Right),
        3 => Ok(MouseButton::Middle),
        4 => Ok(MouseButton::Back),
        5 => Ok(MouseButton::Forward),
        other => Err(malformed(format!("mouse button {other}"))),
    }
}

fn malformed(what: String) -> ProtocolError {
    ProtocolError::Deserialization(format!("invalid input record: {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_record_layout() {
        let record = encode_event(&InputEvent::key_down(KeyCode(0x1234)));
        assert_eq!(record, [1, 0x12, 0x34, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
        let record = encode_event(&InputEvent::key_up(KeyCode::A));
        assert_eq!(&record[..4], &[1, 0x00, 0x41, 0]);
    }

    #[test]
    fn mouse_record_layout() {
        let event = InputEvent::Mouse {
            x: 0x0102,
            y: 0xFFFF,
            action: MouseAction::Press(MouseButton::Right),
        };
        assert_eq!(
            encode_event(&event),
            [2, 0x01, 0x02, 0xFF, 0xFF, 1, 2, 0, 0, 0, 0, 0]
        );

        let wheel = InputEvent::Mouse {
            x: 0,
            y: 0,
            action: MouseAction::Wheel(-120),
        };
        let record = encode_event(&wheel);
        assert_eq!(record[5], 3);
        assert_eq!(i16::from_be_bytes([record[7], record[8]]), -120);
    }

    #[test]
    fn every_event_shape_decodes_back() {
        let events = [
            InputEvent::key_down(KeyCode::SHIFT),
            InputEvent::key_up(KeyCode(u16::MAX)),
            InputEvent::mouse_move(65_535, 0),
            InputEvent::Mouse {
                x: 5,
                y: 6,
                action: MouseAction::Release(MouseButton::Forward),
            },
            InputEvent::Mouse {
                x: 5,
                y: 6,
                action: MouseAction::Wheel(i16::MIN),
            },
        ];
        for event in events {
            assert_eq!(decode_event(&encode_event(&event)).unwrap(), event);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut record = encode_event(&InputEvent::key_down(KeyCode::A));
        record[0] = 9;
        assert!(matches!(
            decode_event(&record),
            Err(ProtocolError::Deserialization(_))
        ));
    }

    #[test]
    fn bad_fields_are_rejected() {
        let mut key = encode_event(&InputEvent::key_down(KeyCode::A));
        key[3] = 7;
        assert!(decode_event(&key).is_err());

        let mut press = encode_event(&InputEvent::Mouse {
            x: 1,
            y: 1,
            action: MouseAction::Press(MouseButton::Left),
        });
        press[6] = 0;
        assert!(decode_event(&press).is_err());

        let mut action = encode_event(&InputEvent::mouse_move(1, 1));
        action[5] = 200;
        assert!(decode_event(&action).is_err());
    }
}
