//! Per-locale keyboard layout table
//!
//! A layout file is a flat JSON object stored on the card at
//! `<layouts_dir>/<LOCALE>.json`, mapping a symbol (a single character or a
//! key name such as `ENTER` or `CTRL`) to `"MM,RR,KK"`: modifier, reserved
//! and keycode bytes in hex.

use super::keymap::KeyStroke;
use crate::storage::{SessionError, StorageSession};
use log::{debug, info, warn};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from loading a layout file
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout file not found: {0}")]
    NotFound(String),
    #[error("failed to read layout file: {0}")]
    Storage(#[from] SessionError),
    #[error("invalid layout JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("layout root is not an object")]
    NotAnObject,
    #[error("invalid entry for {symbol:?}: {value}")]
    InvalidEntry { symbol: String, value: String },
}

/// Path of the layout file for `locale` under `dir`
pub fn layout_path(dir: &str, locale: &str) -> String {
    format!("{}/{}.json", dir.trim_end_matches('/'), locale)
}

/// Decode `"MM,RR,KK"` into a key stroke. The middle byte must be valid hex
/// but is otherwise ignored.
pub fn parse_entry(value: &str) -> Option<KeyStroke> {
    let mut parts = value.split(',').map(str::trim);
    let modifier = parse_hex_byte(parts.next()?)?;
    parse_hex_byte(parts.next()?)?;
    let keycode = parse_hex_byte(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(KeyStroke::new(modifier, keycode))
}

/// Parse one or two hex digits, with an optional `0x` prefix
pub fn parse_hex_byte(text: &str) -> Option<u8> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || digits.len() > 2 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

/// Symbol table for the active locale
#[derive(Debug, Clone, Default)]
pub struct KeyboardLayout {
    locale: String,
    entries: HashMap<String, KeyStroke>,
    loaded: bool,
}

impl KeyboardLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<dir>/<locale>.json` from the card, replacing the current table.
    ///
    /// On any failure the table is cleared and left unloaded.
    pub fn load(
        &mut self,
        storage: &mut StorageSession,
        dir: &str,
        locale: &str,
    ) -> Result<(), LayoutError> {
        self.clear();
        let path = layout_path(dir, locale);
        info!("Loading keyboard layout {} from {}", locale, path);

        if !storage.exists(&path) {
            warn!("Layout file not found: {}", path);
            return Err(LayoutError::NotFound(path));
        }
        let text = storage.read_to_string(&path)?;
        self.load_from_str(locale, &text)
    }

    /// Parse a layout document, replacing the current table
    pub fn load_from_str(&mut self, locale: &str, json: &str) -> Result<(), LayoutError> {
        self.clear();

        let doc: serde_json::Value = serde_json::from_str(json)?;
        let object = doc.as_object().ok_or(LayoutError::NotAnObject)?;

        let mut entries = HashMap::with_capacity(object.len());
        for (symbol, value) in object {
            let stroke = value.as_str().and_then(parse_entry).ok_or_else(|| {
                LayoutError::InvalidEntry {
                    symbol: symbol.clone(),
                    value: value.to_string(),
                }
            })?;
            entries.insert(symbol.clone(), stroke);
        }

        debug!("Layout {} has {} entries", locale, entries.len());
        self.locale = locale.to_string();
        self.entries = entries;
        self.loaded = true;
        Ok(())
    }

    pub fn lookup(&self, symbol: &str) -> Option<KeyStroke> {
        if !self.loaded {
            return None;
        }
        self.entries.get(symbol).copied()
    }

    pub fn lookup_char(&self, c: char) -> Option<KeyStroke> {
        let mut buf = [0u8; 4];
        self.lookup(c.encode_utf8(&mut buf))
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Locale of the loaded table, empty when unloaded
    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.locale.clear();
        self.loaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryCard;

    const SAMPLE: &str = r#"{ "a": "00,00,04", "A": "02,00,04", "ENTER": "00,00,28", "CTRL": "01,00,00" }"#;

    fn mounted(card: &MemoryCard) -> StorageSession {
        let mut session = StorageSession::new(Box::new(card.clone()), Box::new(ManualClock::new()));
        assert!(session.mount(false, "/sdcard", true));
        session
    }

    #[test]
    fn parse_entry_accepts_hex_triples() {
        assert_eq!(parse_entry("02,00,04"), Some(KeyStroke::new(0x02, 0x04)));
        assert_eq!(parse_entry("0x01, 0, 4C"), Some(KeyStroke::new(0x01, 0x4C)));
        assert_eq!(parse_entry("ff,00,ff"), Some(KeyStroke::new(0xFF, 0xFF)));
    }

    #[test]
    fn parse_entry_rejects_malformed() {
        assert_eq!(parse_entry("02,04"), None);
        assert_eq!(parse_entry("02,00,04,00"), None);
        assert_eq!(parse_entry("zz,00,04"), None);
        assert_eq!(parse_entry("100,00,04"), None);
        assert_eq!(parse_entry(""), None);
    }

    #[test]
    fn lookup_returns_encoded_values() {
        let mut layout = KeyboardLayout::new();
        layout.load_from_str("US", SAMPLE).unwrap();
        assert!(layout.is_loaded());
        assert_eq!(layout.locale(), "US");
        assert_eq!(layout.len(), 4);
        assert_eq!(layout.lookup("A"), Some(KeyStroke::new(0x02, 0x04)));
        assert_eq!(layout.lookup_char('a'), Some(KeyStroke::new(0, 0x04)));
        assert_eq!(layout.lookup("CTRL"), Some(KeyStroke::new(0x01, 0)));
        assert_eq!(layout.lookup("b"), None);
    }

    #[test]
    fn unloaded_table_misses_everything() {
        let layout = KeyboardLayout::new();
        assert!(!layout.is_loaded());
        assert_eq!(layout.lookup("a"), None);
    }

    #[test]
    fn malformed_document_leaves_table_unloaded() {
        let mut layout = KeyboardLayout::new();
        layout.load_from_str("US", SAMPLE).unwrap();

        assert!(matches!(layout.load_from_str("DE", "{ not json"), Err(LayoutError::Json(_))));
        assert!(!layout.is_loaded());
        assert_eq!(layout.lookup("a"), None);

        assert!(matches!(layout.load_from_str("DE", "[1, 2]"), Err(LayoutError::NotAnObject)));
        assert!(matches!(
            layout.load_from_str("DE", r#"{ "a": "00,04" }"#),
            Err(LayoutError::InvalidEntry { .. })
        ));
        assert!(matches!(
            layout.load_from_str("DE", r#"{ "a": 4 }"#),
            Err(LayoutError::InvalidEntry { .. })
        ));
        assert!(!layout.is_loaded());
    }

    #[test]
    fn load_reads_from_card() {
        let card = MemoryCard::new();
        card.put_file("/languages/US.json", SAMPLE.as_bytes().to_vec());
        let mut session = mounted(&card);

        let mut layout = KeyboardLayout::new();
        layout.load(&mut session, "/languages", "US").unwrap();
        assert_eq!(layout.lookup("ENTER"), Some(KeyStroke::new(0, 0x28)));
    }

    #[test]
    fn missing_file_discards_previous_table() {
        let card = MemoryCard::new();
        card.put_file("/languages/US.json", SAMPLE.as_bytes().to_vec());
        let mut session = mounted(&card);

        let mut layout = KeyboardLayout::new();
        layout.load(&mut session, "/languages/", "US").unwrap();
        let err = layout.load(&mut session, "/languages", "FR").unwrap_err();
        assert!(matches!(err, LayoutError::NotFound(ref p) if p == "/languages/FR.json"));
        assert!(!layout.is_loaded());
        assert_eq!(layout.lookup("a"), None);
    }

    #[test]
    fn unmounted_session_fails_load() {
        let card = MemoryCard::new();
        card.put_file("/languages/US.json", SAMPLE.as_bytes().to_vec());
        let mut session = StorageSession::new(Box::new(card), Box::new(ManualClock::new()));
        let mut layout = KeyboardLayout::new();
        assert!(layout.load(&mut session, "/languages", "US").is_err());
        assert!(!layout.is_loaded());
    }
}
