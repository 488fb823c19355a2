//! Keystroke script dialect: parsing and execution

pub mod engine;
pub mod parser;

pub use engine::{EngineState, InterpreterState, ScriptEngine, ScriptError};
pub use parser::{parse_line, Command, Line, ParseError};
