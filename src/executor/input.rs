// Physical input primitives and their enigo-backed implementation.
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::errors::{OperatorError, OperatorResult};

/// OS automation primitives consumed by the action executor.
///
/// Coordinates are in the input backend's space (logical pixels).
pub trait InputDriver: Send + Sync {
    fn cursor_position(&self) -> OperatorResult<(i32, i32)>;
    fn move_to(&self, x: i32, y: i32) -> OperatorResult<()>;
    fn click(&self, x: i32, y: i32) -> OperatorResult<()>;
    /// Positive `clicks` scroll up, negative scroll down.
    fn scroll(&self, clicks: i32) -> OperatorResult<()>;
    fn key_down(&self, key: &str) -> OperatorResult<()>;
    fn key_up(&self, key: &str) -> OperatorResult<()>;
    fn type_text(&self, text: &str) -> OperatorResult<()>;
}

/// `enigo` driver. A fresh connection is opened per primitive so the driver
/// can be shared across threads on every platform.
///
/// Connections must not release held keys when dropped: a chord is a
/// `key_down` per key followed by the `key_up`s, each on its own connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnigoDriver;

impl EnigoDriver {
    fn settings() -> Settings {
        Settings {
            release_keys_when_dropped: false,
            ..Settings::default()
        }
    }

    fn enigo() -> OperatorResult<Enigo> {
        Enigo::new(&Self::settings())
            .map_err(|e| OperatorError::Executor(format!("input backend unavailable: {e}")))
    }
}

fn input_err(what: &str, e: impl std::fmt::Display) -> OperatorError {
    OperatorError::Executor(format!("{what}: {e}"))
}

impl InputDriver for EnigoDriver {
    fn cursor_position(&self) -> OperatorResult<(i32, i32)> {
        Self::enigo()?.location().map_err(|e| input_err("cursor location", e))
    }

    fn move_to(&self, x: i32, y: i32) -> OperatorResult<()> {
        Self::enigo()?
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| input_err("move mouse", e))
    }

    fn click(&self, x: i32, y: i32) -> OperatorResult<()> {
        let mut enigo = Self::enigo()?;
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| input_err("move mouse", e))?;
        enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| input_err("left click", e))
    }

    fn scroll(&self, clicks: i32) -> OperatorResult<()> {
        // enigo scrolls down for positive lengths.
        Self::enigo()?
            .scroll(-clicks, Axis::Vertical)
            .map_err(|e| input_err("scroll", e))
    }

    fn key_down(&self, key: &str) -> OperatorResult<()> {
        let k = map_key(key)?;
        Self::enigo()?
            .key(k, Direction::Press)
            .map_err(|e| input_err(&format!("key down '{key}'"), e))
    }

    fn key_up(&self, key: &str) -> OperatorResult<()> {
        let k = map_key(key)?;
        Self::enigo()?
            .key(k, Direction::Release)
            .map_err(|e| input_err(&format!("key up '{key}'"), e))
    }

    fn type_text(&self, text: &str) -> OperatorResult<()> {
        Self::enigo()?.text(text).map_err(|e| input_err("type text", e))
    }
}

/// Map a model-facing key name to an enigo key. Single characters map to
/// themselves; names are case-insensitive.
pub fn map_key(name: &str) -> OperatorResult<Key> {
    let lower = name.trim().to_lowercase();
    let key = match lower.as_str() {
        "ctrl" | "control" => Key::Control,
        "shift" => Key::Shift,
        "alt" | "option" => Key::Alt,
        "cmd" | "command" | "win" | "windows" | "super" | "meta" => Key::Meta,
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "up" | "arrowup" => Key::UpArrow,
        "down" | "arrowdown" => Key::DownArrow,
        "left" | "arrowleft" => Key::LeftArrow,
        "right" | "arrowright" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "capslock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => {
            let mut chars = lower.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => {
                    return Err(OperatorError::Executor(format!("unknown key '{name}'")));
                }
            }
        }
    };
    Ok(key)
}
