//! Keyboard layouts and HID report output

pub mod hid;
pub mod keymap;
pub mod layout;

pub use hid::{HidError, HidKeyboard, HidgSink, KeyReport, KeyReportSink, NullSink, RecordingSink};
pub use keymap::{KeyStroke, US_KEYMAP, us_layout_json};
pub use layout::{KeyboardLayout, LayoutError};
