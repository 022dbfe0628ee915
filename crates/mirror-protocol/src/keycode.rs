//! Android key codes and motion button masks.

pub const KEYCODE_HOME: u32 = 3;
pub const KEYCODE_BACK: u32 = 4;
pub const KEYCODE_0: u32 = 7;
pub const KEYCODE_9: u32 = 16;
pub const KEYCODE_VOLUME_UP: u32 = 24;
pub const KEYCODE_VOLUME_DOWN: u32 = 25;
pub const KEYCODE_POWER: u32 = 26;
pub const KEYCODE_A: u32 = 29;
pub const KEYCODE_Z: u32 = 54;
pub const KEYCODE_ALT_LEFT: u32 = 57;
pub const KEYCODE_SHIFT_LEFT: u32 = 59;
pub const KEYCODE_SPACE: u32 = 62;
pub const KEYCODE_ENTER: u32 = 66;
pub const KEYCODE_DEL: u32 = 67;
pub const KEYCODE_MENU: u32 = 82;
pub const KEYCODE_ESCAPE: u32 = 111;
pub const KEYCODE_CTRL_LEFT: u32 = 113;
pub const KEYCODE_VOLUME_MUTE: u32 = 164;

pub const BUTTON_PRIMARY: u32 = 1 << 0;
pub const BUTTON_SECONDARY: u32 = 1 << 1;
pub const BUTTON_TERTIARY: u32 = 1 << 2;
pub const BUTTON_BACK: u32 = 1 << 3;
pub const BUTTON_FORWARD: u32 = 1 << 4;

/// Device buttons exposed next to the mirrored screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareButton {
    Power,
    VolumeUp,
    VolumeDown,
    Mute,
    Back,
    Home,
    Menu,
}

impl HardwareButton {
    pub fn keycode(self) -> u32 {
        match self {
            Self::Power => KEYCODE_POWER,
            Self::VolumeUp => KEYCODE_VOLUME_UP,
            Self::VolumeDown => KEYCODE_VOLUME_DOWN,
            Self::Mute => KEYCODE_VOLUME_MUTE,
            Self::Back => KEYCODE_BACK,
            Self::Home => KEYCODE_HOME,
            Self::Menu => KEYCODE_MENU,
        }
    }
}

/// Map a host key name to an Android key code.
///
/// Covers letters, digits and a handful of editing/modifier keys.
/// Matching is case-insensitive; digits may be given as `7` or `D7`.
pub fn keycode_for_key_name(name: &str) -> Option<u32> {
    let upper = name.to_ascii_uppercase();
    let bytes = upper.as_bytes();

    match bytes {
        [c @ b'A'..=b'Z'] => return Some(KEYCODE_A + u32::from(c - b'A')),
        [d @ b'0'..=b'9'] | [b'D', d @ b'0'..=b'9'] => {
            return Some(KEYCODE_0 + u32::from(d - b'0'))
        }
        _ => {}
    }

    match upper.as_str() {
        "ENTER" | "RETURN" => Some(KEYCODE_ENTER),
        "ESCAPE" | "ESC" => Some(KEYCODE_ESCAPE),
        "SPACE" => Some(KEYCODE_SPACE),
        "SHIFT" | "LEFTSHIFT" => Some(KEYCODE_SHIFT_LEFT),
        "CTRL" | "CONTROL" | "LEFTCTRL" => Some(KEYCODE_CTRL_LEFT),
        "ALT" | "LEFTALT" => Some(KEYCODE_ALT_LEFT),
        "BACKSPACE" | "BACK" => Some(KEYCODE_DEL),
        _ => None,
    }
}
