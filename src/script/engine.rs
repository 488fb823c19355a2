//! Script interpreter
//!
//! A run goes `Idle -> Running -> Completed | Aborted` in one synchronous
//! call. Delays block on the keyboard's clock. A line that cannot be parsed
//! or resolved is logged and skipped; only a missing script, a layout that
//! fails to load, or a failing HID sink end the run early.

use super::parser::{parse_line, script_lines, Command, Line};
use crate::config::ScriptConfig;
use crate::keyboard::{HidError, HidKeyboard, KeyStroke, KeyboardLayout, LayoutError};
use crate::report::{RunOutcome, RunReport, RunSummary, SkippedLine};
use crate::storage::{SessionError, StorageSession};
use chrono::Local;
use log::{debug, error, info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("script not found: {0}")]
    NotFound(String),
    #[error("keyboard layout failed to load: {0}")]
    Layout(#[from] LayoutError),
    #[error("failed to read script: {0}")]
    Storage(#[from] SessionError),
    #[error("HID output failed: {0}")]
    Hid(#[from] HidError),
}

/// Longest key name worth looking up in a layout
const MAX_SYMBOL_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
}

impl EngineState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Aborted => "Aborted",
        }
    }
}

/// Per-run interpreter state, reset at the start of every run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterpreterState {
    pub default_delay_ms: u64,
    /// Last line that sent input; the target of REPEAT
    pub last_command_line: String,
    pub active_locale: String,
    /// REPEAT iterations still allowed in this run
    pub repeat_budget: u32,
}

enum Outcome {
    Ignored,
    Executed,
    Skipped(String),
}

#[derive(Default)]
struct RunStats {
    summary: RunSummary,
    skipped: Vec<SkippedLine>,
}

/// Runs scripts from the card against a HID keyboard
pub struct ScriptEngine {
    keyboard: HidKeyboard,
    layout: KeyboardLayout,
    config: ScriptConfig,
    state: EngineState,
    interp: InterpreterState,
    last_report: Option<RunReport>,
}

impl ScriptEngine {
    pub fn new(keyboard: HidKeyboard, config: ScriptConfig) -> Self {
        Self {
            keyboard,
            layout: KeyboardLayout::new(),
            config,
            state: EngineState::Idle,
            interp: InterpreterState::default(),
            last_report: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn interpreter(&self) -> &InterpreterState {
        &self.interp
    }

    pub fn layout(&self) -> &KeyboardLayout {
        &self.layout
    }

    pub fn keyboard(&self) -> &HidKeyboard {
        &self.keyboard
    }

    /// Report of the most recent run that got past the existence check
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Load a layout outside of a script run
    pub fn load_locale(&mut self, storage: &mut StorageSession, locale: &str) -> Result<(), LayoutError> {
        let result = self.layout.load(storage, &self.config.layouts_dir, locale);
        self.interp.active_locale = self.layout.locale().to_string();
        result
    }

    /// Card path of a script name: absolute names are kept, others are
    /// taken from the card root
    pub fn script_path(filename: &str) -> String {
        if filename.starts_with('/') {
            filename.to_string()
        } else {
            format!("/{}", filename)
        }
    }

    /// Execute a script file from the card
    pub fn run(&mut self, storage: &mut StorageSession, filename: &str) -> Result<RunReport, ScriptError> {
        let path = Self::script_path(filename);
        if !storage.exists(&path) {
            warn!("Script not found: {}", path);
            self.state = EngineState::Idle;
            return Err(ScriptError::NotFound(path));
        }

        info!("Executing script: {}", path);
        self.state = EngineState::Running;
        self.interp = InterpreterState {
            active_locale: self.layout.locale().to_string(),
            repeat_budget: self.config.max_repeat_iterations,
            ..InterpreterState::default()
        };
        let started_at = Local::now();
        let start_ms = self.keyboard.clock().now_ms();
        let start_reports = self.keyboard.reports_sent();
        let mut stats = RunStats::default();

        let result = self.run_body(storage, &path, &mut stats);

        stats.summary.locale = self.interp.active_locale.clone();
        stats.summary.reports_sent = self.keyboard.reports_sent() - start_reports;
        stats.summary.duration_ms = self.keyboard.clock().now_ms().saturating_sub(start_ms);
        let outcome = match &result {
            Ok(()) => RunOutcome::Completed,
            Err(e) => RunOutcome::Aborted { reason: e.to_string() },
        };
        let report = RunReport::new(&path, started_at, stats.summary, outcome, stats.skipped);
        self.last_report = Some(report.clone());

        match result {
            Ok(()) => {
                self.state = EngineState::Completed;
                info!(
                    "Script execution completed: {} executed, {} skipped, {} reports",
                    report.summary.lines_executed, report.summary.lines_skipped, report.summary.reports_sent
                );
                Ok(report)
            }
            Err(e) => {
                self.state = EngineState::Aborted;
                error!("Script aborted: {}", e);
                Err(e)
            }
        }
    }

    fn run_body(&mut self, storage: &mut StorageSession, path: &str, stats: &mut RunStats) -> Result<(), ScriptError> {
        if !self.layout.is_loaded() {
            let locale = self.config.default_locale.clone();
            self.layout.load(storage, &self.config.layouts_dir, &locale)?;
            self.interp.active_locale = locale;
        }

        let text = storage.read_to_string(path)?;

        for (index, raw) in script_lines(&text).enumerate() {
            match self.execute_line(storage, raw, false, stats)? {
                Outcome::Ignored => {}
                Outcome::Executed => {
                    stats.summary.lines_total += 1;
                    stats.summary.lines_executed += 1;
                }
                Outcome::Skipped(reason) => {
                    stats.summary.lines_total += 1;
                    stats.summary.lines_skipped += 1;
                    stats.skipped.push(SkippedLine {
                        line: index + 1,
                        text: raw.trim().to_string(),
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    fn execute_line(
        &mut self,
        storage: &mut StorageSession,
        raw: &str,
        repeating: bool,
        stats: &mut RunStats,
    ) -> Result<Outcome, ScriptError> {
        let command = match parse_line(raw) {
            Ok(Line::Blank) | Ok(Line::Comment) => return Ok(Outcome::Ignored),
            Ok(Line::Command(command)) => command,
            Err(e) => {
                warn!("Skipping line {:?}: {}", raw.trim(), e);
                return Ok(Outcome::Skipped(e.to_string()));
            }
        };

        let sends_input = command.sends_input();
        match command {
            Command::Delay(ms) => {
                debug!("DELAY {}", ms);
                self.keyboard.clock().sleep_ms(ms);
            }
            Command::DefaultDelay(ms) => self.interp.default_delay_ms = ms,
            Command::Locale(code) => {
                self.layout.load(storage, &self.config.layouts_dir, &code)?;
                self.interp.active_locale = code;
            }
            Command::Repeat(count) => return self.repeat(storage, count, repeating, stats),
            Command::String(text) => self.type_text(&text)?,
            Command::Keycode(stroke) => self.keyboard.tap(stroke)?,
            Command::Key(name) => {
                if !self.send_combo(name)? {
                    return Ok(Outcome::Skipped(format!("no mapping for {}", name)));
                }
            }
            Command::Combo(expr) => {
                if !self.send_combo(&expr)? {
                    return Ok(Outcome::Skipped(format!("could not resolve {:?}", expr)));
                }
            }
        }

        if sends_input {
            self.interp.last_command_line = raw.trim().to_string();
            self.default_delay();
        }
        Ok(Outcome::Executed)
    }

    fn repeat(
        &mut self,
        storage: &mut StorageSession,
        count: u32,
        repeating: bool,
        stats: &mut RunStats,
    ) -> Result<Outcome, ScriptError> {
        if repeating {
            warn!("Nested REPEAT ignored");
            return Ok(Outcome::Skipped("nested REPEAT".to_string()));
        }
        let target = self.interp.last_command_line.clone();
        if target.is_empty() {
            warn!("REPEAT with no previous command");
            return Ok(Outcome::Skipped("nothing to repeat".to_string()));
        }

        debug!("REPEAT {} x {:?}", count, target);
        for _ in 0..count {
            if self.interp.repeat_budget == 0 {
                warn!(
                    "REPEAT limit of {} iterations reached, stopping",
                    self.config.max_repeat_iterations
                );
                break;
            }
            self.interp.repeat_budget -= 1;
            stats.summary.repeat_iterations += 1;
            self.execute_line(storage, &target, true, stats)?;
        }
        Ok(Outcome::Executed)
    }

    fn type_text(&mut self, text: &str) -> Result<(), ScriptError> {
        for c in text.chars() {
            match self.layout.lookup_char(c) {
                Some(stroke) => {
                    self.keyboard.tap(stroke)?;
                    self.default_delay();
                }
                None => warn!("No mapping for character {:?}", c),
            }
        }
        Ok(())
    }

    fn send_combo(&mut self, expr: &str) -> Result<bool, ScriptError> {
        match self.resolve_combo(expr) {
            Some(stroke) => {
                self.keyboard.tap(stroke)?;
                Ok(true)
            }
            None => {
                warn!("Could not parse key combo: {}", expr);
                Ok(false)
            }
        }
    }

    fn default_delay(&self) {
        if self.interp.default_delay_ms > 0 {
            self.keyboard.clock().sleep_ms(self.interp.default_delay_ms);
        }
    }

    fn lookup_symbol(&self, symbol: &str) -> Option<KeyStroke> {
        if symbol.chars().count() == 1 {
            self.layout.lookup(symbol)
        } else {
            self.layout.lookup(&symbol.to_uppercase())
        }
    }

    /// Resolve a key or key combination against the active layout.
    ///
    /// The remaining text is tried as a single symbol first. Otherwise the
    /// part before the first `+`, `-` or whitespace contributes its modifier
    /// and the rest is resolved the same way, so `CTRL-ALT-DELETE` and
    /// `GUI r` both work. Single characters are looked up as written,
    /// longer names upper-cased. Runs in one pass over the expression.
    pub fn resolve_combo(&self, expr: &str) -> Option<KeyStroke> {
        let mut rest = expr.trim();
        let mut modifier = 0u8;
        loop {
            if rest.is_empty() {
                return None;
            }
            // No layout name is this long, so skip the upper-casing lookup
            if rest.len() <= MAX_SYMBOL_LEN {
                if let Some(key) = self.lookup_symbol(rest) {
                    return Some(KeyStroke::new(modifier | key.modifier, key.keycode));
                }
            }

            let split = rest.find(|c: char| c == '+' || c == '-' || c.is_whitespace())?;
            let sep_len = rest[split..].chars().next().map_or(1, char::len_utf8);
            let head = rest[..split].trim();
            if !head.is_empty() {
                modifier |= self.lookup_symbol(head)?.modifier;
            }
            rest = rest[split + sep_len..].trim();
        }
    }
}
