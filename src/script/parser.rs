//! Line tokenizer for the script dialect
//!
//! One command per line. The keyword is everything up to the first
//! whitespace and is matched case-insensitively; the rest of the line,
//! trimmed, is its argument.

use crate::keyboard::KeyStroke;
use crate::keyboard::layout::parse_hex_byte;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("{command} expects a number, got {arg:?}")]
    InvalidNumber { command: &'static str, arg: String },
    #[error("{0} is missing its argument")]
    MissingArgument(&'static str),
    #[error("KEYCODE expects two hex bytes, got {0:?}")]
    InvalidKeycode(String),
}

/// A single executable command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Block for the given milliseconds
    Delay(u64),
    /// Delay inserted after every following input line
    DefaultDelay(u64),
    /// Type the text character by character
    String(String),
    /// Switch keyboard layout
    Locale(String),
    /// Re-run the last input line this many times
    Repeat(u32),
    /// Literal modifier and keycode, bypassing the layout
    Keycode(KeyStroke),
    /// Named key, normalized to its canonical name
    Key(&'static str),
    /// Anything else: a key or key combination such as `CTRL-ALT-DELETE`
    Combo(String),
}

impl Command {
    /// Whether executing this command sends keyboard input
    pub fn sends_input(&self) -> bool {
        matches!(
            self,
            Self::String(_) | Self::Keycode(_) | Self::Key(_) | Self::Combo(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Blank,
    Comment,
    Command(Command),
}

/// Named keys and their aliases
const NAMED_KEYS: &[(&str, &str)] = &[
    ("ENTER", "ENTER"),
    ("TAB", "TAB"),
    ("ESC", "ESC"),
    ("ESCAPE", "ESC"),
    ("DELETE", "DELETE"),
    ("DEL", "DELETE"),
    ("UP", "UP"),
    ("UPARROW", "UP"),
    ("DOWN", "DOWN"),
    ("DOWNARROW", "DOWN"),
    ("LEFT", "LEFT"),
    ("LEFTARROW", "LEFT"),
    ("RIGHT", "RIGHT"),
    ("RIGHTARROW", "RIGHT"),
    ("CAPSLOCK", "CAPSLOCK"),
    ("NUMLOCK", "NUMLOCK"),
    ("PRINTSCREEN", "PRINTSCREEN"),
    ("SPACE", "SPACE"),
];

fn named_key(keyword: &str) -> Option<&'static str> {
    NAMED_KEYS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(keyword))
        .map(|&(_, canonical)| canonical)
}

fn number<T: std::str::FromStr>(command: &'static str, args: &str) -> Result<T, ParseError> {
    if args.is_empty() {
        return Err(ParseError::MissingArgument(command));
    }
    args.parse().map_err(|_| ParseError::InvalidNumber {
        command,
        arg: args.to_string(),
    })
}

fn keycode(args: &str) -> Result<KeyStroke, ParseError> {
    let invalid = || ParseError::InvalidKeycode(args.to_string());
    let mut parts = args.split_whitespace();
    let modifier = parts.next().and_then(parse_hex_byte).ok_or_else(invalid)?;
    let code = parts.next().and_then(parse_hex_byte).ok_or_else(invalid)?;
    if parts.next().is_some() {
        return Err(invalid());
    }
    Ok(KeyStroke::new(modifier, code))
}

/// Split a trimmed line into keyword and argument
pub fn split_command(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((keyword, args)) => (keyword, args.trim()),
        None => (line, ""),
    }
}

/// Parse one script line
pub fn parse_line(raw: &str) -> Result<Line, ParseError> {
    let line = raw.trim();
    if line.is_empty() {
        return Ok(Line::Blank);
    }

    let (keyword, args) = split_command(line);
    let upper = keyword.to_ascii_uppercase();

    let command = match upper.as_str() {
        "REM" => return Ok(Line::Comment),
        "DELAY" => Command::Delay(number("DELAY", args)?),
        "DEFAULTDELAY" | "DEFAULT_DELAY" => Command::DefaultDelay(number("DEFAULTDELAY", args)?),
        "STRING" => Command::String(args.to_string()),
        "LOCALE" => {
            if args.is_empty() {
                return Err(ParseError::MissingArgument("LOCALE"));
            }
            Command::Locale(args.to_ascii_uppercase())
        }
        "REPEAT" => Command::Repeat(number("REPEAT", args)?),
        "KEYCODE" => Command::Keycode(keycode(args)?),
        _ => match named_key(keyword) {
            Some(name) if args.is_empty() => Command::Key(name),
            _ => Command::Combo(line.to_string()),
        },
    };
    Ok(Line::Command(command))
}

/// Lines of a script, split on line feeds. A final line without a
/// terminator is kept.
pub fn script_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
}
