//! USB-HID usage codes and the built-in US layout
//!
//! Layout files on the card map symbols to `"MM,RR,KK"` hex strings. The
//! table here is the standard US mapping, used to seed a fresh card with
//! `/languages/US.json`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Left Control modifier bit
pub const MOD_LCTRL: u8 = 0x01;
/// Left Shift modifier bit
pub const MOD_LSHIFT: u8 = 0x02;
/// Left Alt modifier bit
pub const MOD_LALT: u8 = 0x04;
/// Left GUI (Windows/Command) modifier bit
pub const MOD_LGUI: u8 = 0x08;
pub const MOD_RCTRL: u8 = 0x10;
pub const MOD_RSHIFT: u8 = 0x20;
pub const MOD_RALT: u8 = 0x40;
pub const MOD_RGUI: u8 = 0x80;

/// A modifier bitmask plus keycode: one HID key press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyStroke {
    pub modifier: u8,
    pub keycode: u8,
}

impl KeyStroke {
    pub const fn new(modifier: u8, keycode: u8) -> Self {
        Self { modifier, keycode }
    }

    /// Encode as a layout file value: `"MM,00,KK"`
    pub fn to_layout_value(&self) -> String {
        format!("{:02X},00,{:02X}", self.modifier, self.keycode)
    }
}

/// Unshifted and shifted characters for the number and punctuation keys
const CHAR_KEYS: &[(char, char, u8)] = &[
    ('1', '!', 0x1E),
    ('2', '@', 0x1F),
    ('3', '#', 0x20),
    ('4', '$', 0x21),
    ('5', '%', 0x22),
    ('6', '^', 0x23),
    ('7', '&', 0x24),
    ('8', '*', 0x25),
    ('9', '(', 0x26),
    ('0', ')', 0x27),
    ('-', '_', 0x2D),
    ('=', '+', 0x2E),
    ('[', '{', 0x2F),
    (']', '}', 0x30),
    ('\\', '|', 0x31),
    (';', ':', 0x33),
    ('\'', '"', 0x34),
    ('`', '~', 0x35),
    (',', '<', 0x36),
    ('.', '>', 0x37),
    ('/', '?', 0x38),
];

/// Named keys as written in scripts
const NAMED_KEYS: &[(&str, u8)] = &[
    ("ENTER", 0x28),
    ("ESC", 0x29),
    ("ESCAPE", 0x29),
    ("BACKSPACE", 0x2A),
    ("TAB", 0x2B),
    ("SPACE", 0x2C),
    ("CAPSLOCK", 0x39),
    ("F1", 0x3A),
    ("F2", 0x3B),
    ("F3", 0x3C),
    ("F4", 0x3D),
    ("F5", 0x3E),
    ("F6", 0x3F),
    ("F7", 0x40),
    ("F8", 0x41),
    ("F9", 0x42),
    ("F10", 0x43),
    ("F11", 0x44),
    ("F12", 0x45),
    ("PRINTSCREEN", 0x46),
    ("SCROLLLOCK", 0x47),
    ("PAUSE", 0x48),
    ("BREAK", 0x48),
    ("INSERT", 0x49),
    ("HOME", 0x4A),
    ("PAGEUP", 0x4B),
    ("DELETE", 0x4C),
    ("DEL", 0x4C),
    ("END", 0x4D),
    ("PAGEDOWN", 0x4E),
    ("RIGHT", 0x4F),
    ("RIGHTARROW", 0x4F),
    ("LEFT", 0x50),
    ("LEFTARROW", 0x50),
    ("DOWN", 0x51),
    ("DOWNARROW", 0x51),
    ("UP", 0x52),
    ("UPARROW", 0x52),
    ("NUMLOCK", 0x53),
    ("MENU", 0x65),
    ("APP", 0x65),
];

/// Modifier names; they carry no keycode of their own
const MODIFIER_KEYS: &[(&str, u8)] = &[
    ("CTRL", MOD_LCTRL),
    ("CONTROL", MOD_LCTRL),
    ("SHIFT", MOD_LSHIFT),
    ("ALT", MOD_LALT),
    ("GUI", MOD_LGUI),
    ("WINDOWS", MOD_LGUI),
    ("COMMAND", MOD_LGUI),
];

/// Standard US layout: symbol -> key stroke
pub static US_KEYMAP: LazyLock<BTreeMap<String, KeyStroke>> = LazyLock::new(|| {
    let mut map = BTreeMap::new();

    for (i, c) in ('a'..='z').enumerate() {
        let code = 0x04 + i as u8;
        map.insert(c.to_string(), KeyStroke::new(0, code));
        map.insert(c.to_ascii_uppercase().to_string(), KeyStroke::new(MOD_LSHIFT, code));
    }

    for &(plain, shifted, code) in CHAR_KEYS {
        map.insert(plain.to_string(), KeyStroke::new(0, code));
        map.insert(shifted.to_string(), KeyStroke::new(MOD_LSHIFT, code));
    }

    map.insert(" ".to_string(), KeyStroke::new(0, 0x2C));

    for &(name, code) in NAMED_KEYS {
        map.insert(name.to_string(), KeyStroke::new(0, code));
    }

    for &(name, bits) in MODIFIER_KEYS {
        map.insert(name.to_string(), KeyStroke::new(bits, 0));
    }

    map
});

/// The US layout as a layout-file JSON document
pub fn us_layout_json() -> String {
    let doc: serde_json::Map<String, serde_json::Value> = US_KEYMAP
        .iter()
        .map(|(symbol, stroke)| (symbol.clone(), serde_json::Value::String(stroke.to_layout_value())))
        .collect();
    serde_json::to_string_pretty(&serde_json::Value::Object(doc)).unwrap_or_else(|_| "{}".to_string())
}
