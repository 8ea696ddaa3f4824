//! Key identifiers, name parsing and scan-code mapping.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::EngineError;

/// Abstract virtual-key identifier (Windows VK numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const BACKSPACE: KeyCode = KeyCode(0x08);
    pub const TAB: KeyCode = KeyCode(0x09);
    pub const ENTER: KeyCode = KeyCode(0x0D);
    pub const ESCAPE: KeyCode = KeyCode(0x1B);
    pub const SPACE: KeyCode = KeyCode(0x20);
    pub const LEFT: KeyCode = KeyCode(0x25);
    pub const UP: KeyCode = KeyCode(0x26);
    pub const RIGHT: KeyCode = KeyCode(0x27);
    pub const DOWN: KeyCode = KeyCode(0x28);
    pub const DELETE: KeyCode = KeyCode(0x2E);
    pub const A: KeyCode = KeyCode(0x41);
    pub const D: KeyCode = KeyCode(0x44);
    pub const S: KeyCode = KeyCode(0x53);
    pub const W: KeyCode = KeyCode(0x57);
    pub const F1: KeyCode = KeyCode(0x70);
    pub const SCROLL_LOCK: KeyCode = KeyCode(0x91);

    #[inline(always)]
    pub const fn vk(self) -> u16 {
        self.0
    }

    /// Scan code from the built-in US layout table, 0 when unknown.
    #[inline]
    pub fn scan_code(self) -> u16 {
        SCANCODE_MAP.get(&self.0).copied().unwrap_or(0)
    }

    /// Keys that need the extended flag in synthetic input and bit 24 of the
    /// key message `lParam`.
    #[inline(always)]
    pub fn is_extended(self) -> bool {
        matches!(
            self.0,
            0x21..=0x28 // PAGEUP, PAGEDOWN, END, HOME, arrows
                | 0x2D // INSERT
                | 0x2E // DELETE
                | 0x5B // LWIN
                | 0x5C // RWIN
                | 0x6F // DIVIDE
                | 0x90 // NUMLOCK
                | 0xA3 // RCTRL
                | 0xA5 // RALT
        )
    }

    /// Character for `WM_CHAR` delivery, if the key produces one without modifiers.
    pub fn as_char(self) -> Option<char> {
        match self.0 {
            0x41..=0x5A => char::from_u32(self.0 as u32 + 0x20),
            0x30..=0x39 => char::from_u32(self.0 as u32),
            0x20 => Some(' '),
            0x0D => Some('\r'),
            0x09 => Some('\t'),
            0x08 => Some('\u{8}'),
            _ => None,
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vk = self.0;
        match vk {
            0x41..=0x5A | 0x30..=0x39 => write!(f, "{}", vk as u8 as char),
            0x60..=0x69 => write!(f, "NUMPAD{}", vk - 0x60),
            0x70..=0x87 => write!(f, "F{}", vk - 0x70 + 1),
            _ => match NAMED_KEYS.iter().find(|(_, code)| *code == vk) {
                Some((name, _)) => f.write_str(name),
                None => write!(f, "VK_{:02X}", vk),
            },
        }
    }
}

impl FromStr for KeyCode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_name_to_vk(s)
            .map(KeyCode)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown key name: {s}")))
    }
}

/// Edge of a key event delivered to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPhase {
    Down,
    Up,
    /// Transient down followed by up.
    Press,
}

impl fmt::Display for KeyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyPhase::Down => "down",
            KeyPhase::Up => "up",
            KeyPhase::Press => "press",
        })
    }
}

/// Builds the `lParam` of a `WM_KEYDOWN`/`WM_KEYUP` message.
///
/// Bits 0-15 repeat count, 16-23 scan code, 24 extended flag, 30 previous
/// key state, 31 transition state.
#[inline]
pub fn key_message_lparam(scan_code: u16, extended: bool, key_up: bool) -> isize {
    let mut value: u32 = 1 | ((scan_code as u32 & 0xFF) << 16);
    if extended {
        value |= 1 << 24;
    }
    if key_up {
        value |= (1 << 30) | (1 << 31);
    }
    value as i32 as isize
}

pub fn key_name_to_vk(key_name: &str) -> Option<u16> {
    let key = key_name.trim().to_uppercase();

    if key.len() == 1
        && let Some(c) = key.chars().next()
        && (c.is_ascii_alphabetic() || c.is_ascii_digit())
    {
        return Some(c as u16);
    }

    // F1-F24
    if key.starts_with('F')
        && key.len() > 1
        && let Ok(num) = key[1..].parse::<u16>()
        && (1..=24).contains(&num)
    {
        return Some(0x70 + num - 1);
    }

    if key.starts_with("NUMPAD")
        && key.len() > 6
        && let Ok(num) = key[6..].parse::<u16>()
        && num <= 9
    {
        return Some(0x60 + num);
    }

    if let Some(hex) = key.strip_prefix("VK_")
        && let Ok(code) = u16::from_str_radix(hex, 16)
        && code != 0
        && code < 0x100
    {
        return Some(code);
    }

    let canonical = match key.as_str() {
        "ESC" => "ESCAPE",
        "RETURN" => "ENTER",
        "BACK" => "BACKSPACE",
        "CAPITAL" => "CAPSLOCK",
        "SCROLL" => "SCROLLLOCK",
        other => other,
    };
    NAMED_KEYS
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, code)| *code)
}

static NAMED_KEYS: &[(&str, u16)] = &[
    ("BACKSPACE", 0x08),
    ("TAB", 0x09),
    ("CLEAR", 0x0C),
    ("ENTER", 0x0D),
    ("SHIFT", 0x10),
    ("CTRL", 0x11),
    ("ALT", 0x12),
    ("PAUSE", 0x13),
    ("CAPSLOCK", 0x14),
    ("ESCAPE", 0x1B),
    ("SPACE", 0x20),
    ("PAGEUP", 0x21),
    ("PAGEDOWN", 0x22),
    ("END", 0x23),
    ("HOME", 0x24),
    ("LEFT", 0x25),
    ("UP", 0x26),
    ("RIGHT", 0x27),
    ("DOWN", 0x28),
    ("SNAPSHOT", 0x2C),
    ("INSERT", 0x2D),
    ("DELETE", 0x2E),
    ("LWIN", 0x5B),
    ("RWIN", 0x5C),
    ("MULTIPLY", 0x6A),
    ("ADD", 0x6B),
    ("SEPARATOR", 0x6C),
    ("SUBTRACT", 0x6D),
    ("DECIMAL", 0x6E),
    ("DIVIDE", 0x6F),
    ("NUMLOCK", 0x90),
    ("SCROLLLOCK", 0x91),
    ("LSHIFT", 0xA0),
    ("RSHIFT", 0xA1),
    ("LCTRL", 0xA2),
    ("RCTRL", 0xA3),
    ("LALT", 0xA4),
    ("RALT", 0xA5),
    ("OEM_1", 0xBA),
    ("OEM_PLUS", 0xBB),
    ("OEM_COMMA", 0xBC),
    ("OEM_MINUS", 0xBD),
    ("OEM_PERIOD", 0xBE),
    ("OEM_2", 0xBF),
    ("OEM_3", 0xC0),
    ("OEM_4", 0xDB),
    ("OEM_5", 0xDC),
    ("OEM_6", 0xDD),
    ("OEM_7", 0xDE),
];

static SCANCODE_MAP: LazyLock<HashMap<u16, u16>> = LazyLock::new(|| {
    [
        // letter keys (A-Z)
        (0x41, 0x1E),
        (0x42, 0x30),
        (0x43, 0x2E),
        (0x44, 0x20),
        (0x45, 0x12),
        (0x46, 0x21),
        (0x47, 0x22),
        (0x48, 0x23),
        (0x49, 0x17),
        (0x4A, 0x24),
        (0x4B, 0x25),
        (0x4C, 0x26),
        (0x4D, 0x32),
        (0x4E, 0x31),
        (0x4F, 0x18),
        (0x50, 0x19),
        (0x51, 0x10),
        (0x52, 0x13),
        (0x53, 0x1F),
        (0x54, 0x14),
        (0x55, 0x16),
        (0x56, 0x2F),
        (0x57, 0x11),
        (0x58, 0x2D),
        (0x59, 0x15),
        (0x5A, 0x2C),
        // number row (0-9)
        (0x30, 0x0B),
        (0x31, 0x02),
        (0x32, 0x03),
        (0x33, 0x04),
        (0x34, 0x05),
        (0x35, 0x06),
        (0x36, 0x07),
        (0x37, 0x08),
        (0x38, 0x09),
        (0x39, 0x0A),
        // F1-F12
        (0x70, 0x3B),
        (0x71, 0x3C),
        (0x72, 0x3D),
        (0x73, 0x3E),
        (0x74, 0x3F),
        (0x75, 0x40),
        (0x76, 0x41),
        (0x77, 0x42),
        (0x78, 0x43),
        (0x79, 0x44),
        (0x7A, 0x57),
        (0x7B, 0x58),
        (0x1B, 0x01), // ESC
        (0x0D, 0x1C), // ENTER
        (0x09, 0x0F), // TAB
        (0x20, 0x39), // SPACE
        (0x08, 0x0E), // BACKSPACE
        (0x14, 0x3A), // CAPSLOCK
        (0x10, 0x2A), // SHIFT
        (0x11, 0x1D), // CTRL
        (0x12, 0x38), // ALT
        (0xA0, 0x2A), // LSHIFT
        (0xA1, 0x36), // RSHIFT
        (0xA2, 0x1D), // LCTRL
        (0xA3, 0x1D), // RCTRL (extended)
        (0xA4, 0x38), // LALT
        (0xA5, 0x38), // RALT (extended)
        (0x2E, 0x53), // DELETE
        (0x2D, 0x52), // INSERT
        (0x24, 0x47), // HOME
        (0x23, 0x4F), // END
        (0x21, 0x49), // PAGEUP
        (0x22, 0x51), // PAGEDOWN
        (0x26, 0x48), // UP
        (0x28, 0x50), // DOWN
        (0x25, 0x4B), // LEFT
        (0x27, 0x4D), // RIGHT
        (0x90, 0x45), // NUMLOCK
        (0x91, 0x46), // SCROLLLOCK
        // keypad
        (0x60, 0x52),
        (0x61, 0x4F),
        (0x62, 0x50),
        (0x63, 0x51),
        (0x64, 0x4B),
        (0x65, 0x4C),
        (0x66, 0x4D),
        (0x67, 0x47),
        (0x68, 0x48),
        (0x69, 0x49),
        (0x6A, 0x37),
        (0x6B, 0x4E),
        (0x6D, 0x4A),
        (0x6E, 0x53),
        (0x6F, 0x35),
        // OEM punctuation
        (0xBA, 0x27),
        (0xBB, 0x0D),
        (0xBC, 0x33),
        (0xBD, 0x0C),
        (0xBE, 0x34),
        (0xBF, 0x35),
        (0xC0, 0x29),
        (0xDB, 0x1A),
        (0xDC, 0x2B),
        (0xDD, 0x1B),
        (0xDE, 0x28),
    ]
    .iter()
    .cloned()
    .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_name_to_vk_letters_and_digits() {
        assert_eq!(key_name_to_vk("W"), Some(0x57));
        assert_eq!(key_name_to_vk("w"), Some(0x57));
        assert_eq!(key_name_to_vk("7"), Some(0x37));
    }

    #[test]
    fn test_key_name_to_vk_aliases() {
        assert_eq!(key_name_to_vk("ESC"), key_name_to_vk("ESCAPE"));
        assert_eq!(key_name_to_vk("RETURN"), Some(0x0D));
        assert_eq!(key_name_to_vk("SCROLL"), Some(0x91));
        assert_eq!(key_name_to_vk("VK_1B"), Some(0x1B));
        assert_eq!(key_name_to_vk("F24"), Some(0x87));
        assert_eq!(key_name_to_vk("NUMPAD5"), Some(0x65));
    }

    #[test]
    fn test_key_name_to_vk_invalid() {
        assert_eq!(key_name_to_vk("F25"), None);
        assert_eq!(key_name_to_vk("VK_00"), None);
        assert_eq!(key_name_to_vk("NOPE"), None);
        assert!("NOPE".parse::<KeyCode>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for name in ["W", "F5", "NUMPAD3", "SPACE", "SCROLLLOCK", "LCTRL"] {
            let key: KeyCode = name.parse().unwrap();
            assert_eq!(key.to_string(), name);
        }
        assert_eq!(KeyCode(0xFF).to_string(), "VK_FF");
    }

    #[test]
    fn test_extended_keys() {
        assert!(KeyCode::UP.is_extended());
        assert!(KeyCode::DELETE.is_extended());
        assert!(!KeyCode::W.is_extended());
        assert!(!KeyCode(0x60).is_extended());
    }

    #[test]
    fn test_scan_codes() {
        assert_eq!(KeyCode::W.scan_code(), 0x11);
        assert_eq!(KeyCode::SPACE.scan_code(), 0x39);
        assert_eq!(KeyCode(0xFF).scan_code(), 0);
    }

    #[test]
    fn test_key_message_lparam() {
        let down = key_message_lparam(0x11, false, false);
        assert_eq!(down, 0x0011_0001);

        let up = key_message_lparam(0x11, false, true) as u32;
        assert_eq!(up & 0xFFFF, 1);
        assert_eq!((up >> 16) & 0xFF, 0x11);
        assert_ne!(up & (1 << 30), 0);
        assert_ne!(up & (1 << 31), 0);

        let extended = key_message_lparam(0x48, true, false) as u32;
        assert_ne!(extended & (1 << 24), 0);
    }

    #[test]
    fn test_as_char() {
        assert_eq!(KeyCode::W.as_char(), Some('w'));
        assert_eq!(KeyCode(0x35).as_char(), Some('5'));
        assert_eq!(KeyCode::UP.as_char(), None);
    }
}
