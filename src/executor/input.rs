//! OS input injection and window management.
use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::tools::types::MouseButton;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub app_name: String,
    pub minimized: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// A named key, independent of the injection backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyName {
    Control,
    Alt,
    Shift,
    Meta,
    Return,
    Tab,
    Escape,
    Backspace,
    Delete,
    Space,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    F(u8),
    Char(char),
}

impl KeyName {
    pub fn parse(token: &str) -> Option<Self> {
        let t = token.trim().to_ascii_lowercase();
        let key = match t.as_str() {
            "ctrl" | "control" => KeyName::Control,
            "alt" | "option" => KeyName::Alt,
            "shift" => KeyName::Shift,
            "win" | "super" | "meta" | "cmd" | "command" => KeyName::Meta,
            "enter" | "return" => KeyName::Return,
            "tab" => KeyName::Tab,
            "esc" | "escape" => KeyName::Escape,
            "backspace" => KeyName::Backspace,
            "delete" | "del" => KeyName::Delete,
            "space" => KeyName::Space,
            "up" => KeyName::Up,
            "down" => KeyName::Down,
            "left" => KeyName::Left,
            "right" => KeyName::Right,
            "home" => KeyName::Home,
            "end" => KeyName::End,
            "pageup" | "pgup" => KeyName::PageUp,
            "pagedown" | "pgdn" => KeyName::PageDown,
            f if f.len() > 1 && f.starts_with('f') => match f[1..].parse::<u8>() {
                Ok(n @ 1..=12) => KeyName::F(n),
                _ => return None,
            },
            _ => {
                let mut chars = t.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => KeyName::Char(c),
                    _ => return None,
                }
            }
        };
        Some(key)
    }
}

/// Parse a combination such as `ctrl+shift+s`. Every token must be known.
pub fn parse_combo(combo: &str) -> PilotResult<Vec<KeyName>> {
    let tokens: Vec<&str> = combo.split('+').map(str::trim).collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(PilotError::InputInjection(format!("malformed key combination {combo:?}")));
    }
    tokens
        .into_iter()
        .map(|t| {
            KeyName::parse(t)
                .ok_or_else(|| PilotError::InputInjection(format!("unknown key {t:?} in {combo:?}")))
        })
        .collect()
}

/// Synchronous OS-level input. Callers run these on a blocking thread.
pub trait InputBackend: Send + Sync {
    fn screen_size(&self) -> PilotResult<(u32, u32)>;
    fn move_pointer(&self, x: i32, y: i32) -> PilotResult<()>;
    fn click(&self, button: MouseButton, double: bool) -> PilotResult<()>;
    /// Press or release `button` without moving the pointer.
    fn mouse_button(&self, button: MouseButton, pressed: bool) -> PilotResult<()>;
    fn type_text(&self, text: &str) -> PilotResult<()>;
    /// Press `keys` in order, then release them in reverse.
    fn press_keys(&self, keys: &[KeyName]) -> PilotResult<()>;
    /// Positive scrolls up.
    fn scroll(&self, amount: i32) -> PilotResult<()>;
    /// Titled top-level windows, front-most first.
    fn list_windows(&self) -> PilotResult<Vec<WindowInfo>>;
    /// Id of the window receiving keyboard input, when the platform can tell.
    fn foreground_window(&self) -> PilotResult<Option<u64>>;
    fn activate_window(&self, window: &WindowInfo) -> PilotResult<()>;
    fn clipboard_text(&self) -> PilotResult<String>;
    fn set_clipboard_text(&self, text: &str) -> PilotResult<()>;
}

#[cfg(feature = "desktop")]
pub use desktop::EnigoDesktop;

#[cfg(feature = "desktop")]
mod desktop {
    use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

    use super::*;

    /// Input through `enigo`, window enumeration through `xcap`.
    ///
    /// A fresh `Enigo` is built per call since it is not `Send` on every
    /// platform.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct EnigoDesktop;

    fn enigo() -> PilotResult<Enigo> {
        Enigo::new(&Settings::default())
            .map_err(|e| PilotError::InputInjection(format!("failed to initialise input: {e:?}")))
    }

    fn injected<T, E: std::fmt::Debug>(what: &str, r: Result<T, E>) -> PilotResult<T> {
        r.map_err(|e| PilotError::InputInjection(format!("{what} failed: {e:?}")))
    }

    fn to_button(button: MouseButton) -> Button {
        match button {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
            MouseButton::Middle => Button::Middle,
        }
    }

    fn clipboard() -> PilotResult<arboard::Clipboard> {
        arboard::Clipboard::new()
            .map_err(|e| PilotError::InputInjection(format!("clipboard unavailable: {e}")))
    }

    fn to_key(k: KeyName) -> Key {
        match k {
            KeyName::Control => Key::Control,
            KeyName::Alt => Key::Alt,
            KeyName::Shift => Key::Shift,
            KeyName::Meta => Key::Meta,
            KeyName::Return => Key::Return,
            KeyName::Tab => Key::Tab,
            KeyName::Escape => Key::Escape,
            KeyName::Backspace => Key::Backspace,
            KeyName::Delete => Key::Delete,
            KeyName::Space => Key::Space,
            KeyName::Up => Key::UpArrow,
            KeyName::Down => Key::DownArrow,
            KeyName::Left => Key::LeftArrow,
            KeyName::Right => Key::RightArrow,
            KeyName::Home => Key::Home,
            KeyName::End => Key::End,
            KeyName::PageUp => Key::PageUp,
            KeyName::PageDown => Key::PageDown,
            KeyName::F(n) => match n {
                1 => Key::F1,
                2 => Key::F2,
                3 => Key::F3,
                4 => Key::F4,
                5 => Key::F5,
                6 => Key::F6,
                7 => Key::F7,
                8 => Key::F8,
                9 => Key::F9,
                10 => Key::F10,
                11 => Key::F11,
                _ => Key::F12,
            },
            KeyName::Char(c) => Key::Unicode(c),
        }
    }

    impl InputBackend for EnigoDesktop {
        fn screen_size(&self) -> PilotResult<(u32, u32)> {
            let (w, h) = injected("display query", enigo()?.main_display())?;
            Ok((w.max(0) as u32, h.max(0) as u32))
        }

        fn move_pointer(&self, x: i32, y: i32) -> PilotResult<()> {
            injected("mouse move", enigo()?.move_mouse(x, y, Coordinate::Abs))
        }

        fn click(&self, button: MouseButton, double: bool) -> PilotResult<()> {
            let btn = to_button(button);
            let mut enigo = enigo()?;
            injected("click", enigo.button(btn, Direction::Click))?;
            if double {
                std::thread::sleep(std::time::Duration::from_millis(60));
                injected("click", enigo.button(btn, Direction::Click))?;
            }
            Ok(())
        }

        fn mouse_button(&self, button: MouseButton, pressed: bool) -> PilotResult<()> {
            let direction = if pressed { Direction::Press } else { Direction::Release };
            injected("mouse button", enigo()?.button(to_button(button), direction))
        }

        fn type_text(&self, text: &str) -> PilotResult<()> {
            injected("typing", enigo()?.text(text))
        }

        fn press_keys(&self, keys: &[KeyName]) -> PilotResult<()> {
            let mut enigo = enigo()?;
            let mut pressed = Vec::with_capacity(keys.len());
            let mut outcome = Ok(());
            for k in keys.iter().copied().map(to_key) {
                if let Err(e) = injected("key press", enigo.key(k, Direction::Press)) {
                    outcome = Err(e);
                    break;
                }
                pressed.push(k);
            }
            // Never leave a modifier stuck down.
            for k in pressed.into_iter().rev() {
                let _ = enigo.key(k, Direction::Release);
            }
            outcome
        }

        fn scroll(&self, amount: i32) -> PilotResult<()> {
            // enigo treats positive as down.
            injected("scroll", enigo()?.scroll(-amount, Axis::Vertical))
        }

        fn list_windows(&self) -> PilotResult<Vec<WindowInfo>> {
            let windows = xcap::Window::all()
                .map_err(|e| PilotError::InputInjection(format!("failed to list windows: {e}")))?;
            Ok(windows
                .into_iter()
                .filter(|w| !w.title().trim().is_empty())
                .map(|w| WindowInfo {
                    id: u64::from(w.id()),
                    title: w.title().to_string(),
                    app_name: w.app_name().to_string(),
                    minimized: w.is_minimized(),
                    x: w.x(),
                    y: w.y(),
                    width: w.width(),
                    height: w.height(),
                })
                .collect())
        }

        #[cfg(windows)]
        fn foreground_window(&self) -> PilotResult<Option<u64>> {
            use windows::Win32::UI::WindowsAndMessaging::GetForegroundWindow;

            // SAFETY: no arguments; a null handle means no window has focus.
            let hwnd = unsafe { GetForegroundWindow() };
            Ok((!hwnd.0.is_null()).then(|| hwnd.0 as usize as u64))
        }

        /// The window list comes back in z-order, so the top unminimized
        /// entry is the one in front.
        #[cfg(not(windows))]
        fn foreground_window(&self) -> PilotResult<Option<u64>> {
            Ok(self.list_windows()?.into_iter().find(|w| !w.minimized).map(|w| w.id))
        }

        fn clipboard_text(&self) -> PilotResult<String> {
            clipboard()?
                .get_text()
                .map_err(|e| PilotError::InputInjection(format!("clipboard read failed: {e}")))
        }

        fn set_clipboard_text(&self, text: &str) -> PilotResult<()> {
            clipboard()?
                .set_text(text.to_owned())
                .map_err(|e| PilotError::InputInjection(format!("clipboard write failed: {e}")))
        }

        #[cfg(windows)]
        fn activate_window(&self, window: &WindowInfo) -> PilotResult<()> {
            use windows::Win32::Foundation::HWND;
            use windows::Win32::UI::WindowsAndMessaging::{SetForegroundWindow, ShowWindow, SW_RESTORE};

            let hwnd = HWND(window.id as usize as *mut core::ffi::c_void);
            // SAFETY: the handle came from the window enumeration; both calls
            // tolerate stale handles and report failure through their return value.
            unsafe {
                if window.minimized {
                    let _ = ShowWindow(hwnd, SW_RESTORE);
                }
                if !SetForegroundWindow(hwnd).as_bool() {
                    return Err(PilotError::InputInjection(format!(
                        "could not bring {:?} to the foreground",
                        window.title
                    )));
                }
            }
            Ok(())
        }

        /// No portable activation API: click the title bar instead.
        #[cfg(not(windows))]
        fn activate_window(&self, window: &WindowInfo) -> PilotResult<()> {
            if window.minimized || window.width == 0 {
                return Err(PilotError::InputInjection(format!(
                    "window {:?} is minimized and cannot be raised on this platform",
                    window.title
                )));
            }
            let x = window.x + (window.width / 2) as i32;
            let y = window.y + 8;
            tracing::debug!(title = %window.title, x, y, "raising window via title bar click");
            let mut enigo = enigo()?;
            injected("mouse move", enigo.move_mouse(x, y, Coordinate::Abs))?;
            injected("click", enigo.button(Button::Left, Direction::Click))
        }
    }
}
