//! DuckyDeck - keystroke script runner over hot-pluggable removable storage
//!
//! Scripts and per-locale keyboard layouts live on a removable card. A
//! `StorageSession` tracks the card through insertion and removal, the
//! `ScriptEngine` turns script lines into USB-HID keyboard reports, and the
//! terminal picker in `ui` lets an operator choose what to run.

pub mod board;
pub mod clock;
pub mod config;
pub mod keyboard;
pub mod report;
pub mod script;
pub mod storage;
pub mod ui;

pub use board::{Board, BootButton};
pub use config::Config;
pub use script::{ScriptEngine, ScriptError};
pub use storage::StorageSession;
