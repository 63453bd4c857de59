//! Line commands read from stdin by `farhand connect`.

use anyhow::{bail, Context};
use farhand_types::{InputEvent, KeyCode, MouseAction, MouseButton};

/// One parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    /// Events to feed to the session, in order.
    Input(Vec<InputEvent>),
    Suspend,
    Resume,
    Close,
}

/// Parses commands and remembers the pointer position for clicks.
#[derive(Debug, Default)]
pub struct CommandParser {
    pointer: (u16, u16),
}

impl CommandParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one line. Blank lines yield `None`.
    pub fn parse(&mut self, line: &str) -> anyhow::Result<Option<Command>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            [] => return Ok(None),
            ["suspend"] => Command::Suspend,
            ["resume"] => Command::Resume,
            ["close" | "quit"] => Command::Close,
            ["key", code, direction] => {
                let code = parse_key(code)?;
                let event = match *direction {
                    "down" => InputEvent::key_down(code),
                    "up" => InputEvent::key_up(code),
                    other => bail!("expected `down` or `up`, got `{other}`"),
                };
                Command::Input(vec![event])
            }
            ["move", x, y] => {
                let x = x.parse().with_context(|| format!("bad x position `{x}`"))?;
                let y = y.parse().with_context(|| format!("bad y position `{y}`"))?;
                self.pointer = (x, y);
                Command::Input(vec![InputEvent::mouse_move(x, y)])
            }
            ["click", button] => {
                let button = parse_button(button)?;
                Command::Input(vec![
                    self.mouse(MouseAction::Press(button)),
                    self.mouse(MouseAction::Release(button)),
                ])
            }
            ["wheel", delta] => {
                let delta = delta
                    .parse()
                    .with_context(|| format!("bad wheel delta `{delta}`"))?;
                Command::Input(vec![self.mouse(MouseAction::Wheel(delta))])
            }
            _ => bail!("unknown command `{}`", line.trim()),
        };
        Ok(Some(command))
    }

    fn mouse(&self, action: MouseAction) -> InputEvent {
        let (x, y) = self.pointer;
        InputEvent::Mouse { x, y, action }
    }
}

/// A letter or digit, a hex code (`0x41`), or a decimal code.
fn parse_key(word: &str) -> anyhow::Result<KeyCode> {
    let mut chars = word.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(code) = KeyCode::from_ascii(c) {
            return Ok(code);
        }
    }
    let code = match word.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => word.parse(),
    }
    .with_context(|| format!("bad key code `{word}`"))?;
    Ok(KeyCode(code))
}

fn parse_button(word: &str) -> anyhow::Result<MouseButton> {
    Ok(match word {
        "left" => MouseButton::Left,
        "right" => MouseButton::Right,
        "middle" => MouseButton::Middle,
        "back" => MouseButton::Back,
        "forward" => MouseButton::Forward,
        other => bail!("unknown mouse button `{other}`"),
    })
}
