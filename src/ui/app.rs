//! Main application state and logic

use super::widgets::PanelRow;
use crate::board::{Board, CardEvent};
use crate::config::Config;
use crate::report::{RunOutcome, RunReport};
use crate::storage::diagnostics::FsInfo;
use log::info;
use std::path::Path;
use std::time::Instant;

/// Current view/tab in the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppView {
    Scripts,
    Card,
    Report,
    Help,
}

impl AppView {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scripts => "Scripts",
            Self::Card => "Card",
            Self::Report => "Last Run",
            Self::Help => "Help",
        }
    }

    pub fn all() -> &'static [AppView] {
        &[Self::Scripts, Self::Card, Self::Report, Self::Help]
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Scripts => 0,
            Self::Card => 1,
            Self::Report => 2,
            Self::Help => 3,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Scripts,
            1 => Self::Card,
            2 => Self::Report,
            _ => Self::Help,
        }
    }
}

/// Application running state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Running,
    Quitting,
}

/// Main application
pub struct App {
    /// Current view
    pub view: AppView,
    /// Application state
    pub state: AppState,
    /// Configuration
    pub config: Config,
    /// Storage, engine and button
    pub board: Board,
    /// Index of the highlighted script
    pub selected: usize,
    /// Application start time
    pub start_time: Instant,
    /// Scripts run this session
    pub runs: u64,
    /// Last status message
    pub status_message: Option<String>,
    /// Status message timestamp
    pub status_time: Option<Instant>,
}

impl App {
    pub fn new(config: Config, board: Board) -> Self {
        Self {
            view: AppView::Scripts,
            state: AppState::Running,
            config,
            board,
            selected: 0,
            start_time: Instant::now(),
            runs: 0,
            status_message: None,
            status_time: None,
        }
    }

    /// One pass of the device loop: hot-swap, card events, button
    pub fn tick(&mut self) {
        let tick = self.board.tick();
        if let Some(event) = tick.card_events.last() {
            self.set_status(event.describe().to_string());
            if *event == CardEvent::Removed {
                self.selected = 0;
            }
        }
        self.clamp_selection();

        if tick.button_pressed {
            info!("BOOT button pressed");
            self.view = if self.view == AppView::Scripts {
                AppView::Card
            } else {
                AppView::Scripts
            };
        }
    }

    /// Signal a button edge from the terminal
    pub fn press_button(&mut self) {
        let now_ms = self.start_time.elapsed().as_millis() as u64;
        self.board.button().on_edge(now_ms);
    }

    /// Switch to the next view
    pub fn next_view(&mut self) {
        let next = (self.view.index() + 1) % AppView::all().len();
        self.view = AppView::from_index(next);
    }

    /// Switch to the previous view
    pub fn prev_view(&mut self) {
        let current = self.view.index();
        let prev = if current == 0 {
            AppView::all().len() - 1
        } else {
            current - 1
        };
        self.view = AppView::from_index(prev);
    }

    pub fn select_next(&mut self) {
        let count = self.board.scripts().len();
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn select_prev(&mut self) {
        let count = self.board.scripts().len();
        if count > 0 {
            self.selected = if self.selected == 0 { count - 1 } else { self.selected - 1 };
        }
    }

    fn clamp_selection(&mut self) {
        let count = self.board.scripts().len();
        if self.selected >= count {
            self.selected = count.saturating_sub(1);
        }
    }

    pub fn selected_script(&self) -> Option<&str> {
        self.board.scripts().get(self.selected).map(String::as_str)
    }

    /// Run the highlighted script to completion
    pub fn run_selected(&mut self) {
        let Some(name) = self.selected_script().map(str::to_string) else {
            self.set_status("No script selected".to_string());
            return;
        };
        self.runs += 1;
        match self.board.run_script(&name) {
            Ok(report) => self.set_status(format!(
                "{}: {} lines, {} skipped",
                name, report.summary.lines_executed, report.summary.lines_skipped
            )),
            Err(e) => self.set_status(format!("{}: {}", name, e)),
        }
    }

    pub fn rescan(&mut self) {
        let count = self.board.scan_scripts().len();
        self.clamp_selection();
        self.set_status(format!("Found {} script(s)", count));
    }

    pub fn toggle_mount(&mut self) {
        let mounted = self.board.toggle_mount();
        self.clamp_selection();
        if mounted {
            self.set_status("Card mounted".to_string());
        } else if self.board.storage().is_mounted() {
            self.set_status("Unmount failed".to_string());
        } else {
            let error = self.board.storage().last_error_message().to_string();
            self.set_status(if error.is_empty() {
                "Card unmounted".to_string()
            } else {
                error
            });
        }
    }

    /// Write the default layout to the card
    pub fn seed_layout(&mut self) {
        match self.board.seed_layout() {
            Ok(true) => self.set_status("Wrote default US layout".to_string()),
            Ok(false) => self.set_status("US layout already present".to_string()),
            Err(e) => self.set_status(format!("Seed failed: {}", e)),
        }
    }

    /// Request quit
    pub fn quit(&mut self) {
        self.state = AppState::Quitting;
    }

    /// Set a status message
    pub fn set_status(&mut self, message: String) {
        self.status_message = Some(message);
        self.status_time = Some(Instant::now());
    }

    /// Get status message if still within the configured display time
    pub fn get_status(&self) -> Option<&str> {
        match (&self.status_message, self.status_time) {
            (Some(msg), Some(time)) if time.elapsed() < self.config.status_duration() => Some(msg),
            _ => None,
        }
    }

    /// Short card state for the status bar
    pub fn card_state(&self) -> &'static str {
        if self.board.storage().is_mounted() {
            "MOUNTED"
        } else {
            "NO CARD"
        }
    }

    /// Rows for the Card view
    pub fn card_rows(&self) -> Vec<PanelRow> {
        let info = FsInfo::capture(self.board.storage());
        let mut rows = Vec::new();

        if info.mounted {
            rows.push(PanelRow::ok("Mounted", info.mount_point.clone()));
        } else {
            rows.push(PanelRow::warning("Mounted", "no"));
        }
        rows.push(PanelRow::info("Card type", info.card_type.clone()));
        rows.push(PanelRow::info("Current dir", info.current_dir.clone()));
        rows.push(PanelRow::info(
            "Capacity",
            format!("{:.2} MB", info.total_bytes as f64 / 1_048_576.0),
        ));
        let usage = info.usage_percent();
        let usage_value = format!(
            "{:.2} MB ({:.1}%)",
            info.used_bytes as f64 / 1_048_576.0,
            usage
        );
        rows.push(if usage > 90.0 {
            PanelRow::warning("Used", usage_value)
        } else {
            PanelRow::info("Used", usage_value)
        });
        rows.push(PanelRow::info("Sectors", format!("{} x {} B", info.sector_count, info.block_size)));

        let layout = self.board.engine().layout();
        if layout.is_loaded() {
            rows.push(PanelRow::ok("Layout", format!("{} ({} keys)", layout.locale(), layout.len())));
        } else {
            rows.push(PanelRow::info("Layout", "not loaded"));
        }

        if info.last_error_code == 0 {
            rows.push(PanelRow::ok("Last error", "none"));
        } else {
            rows.push(PanelRow::error(
                "Last error",
                format!("[{}] {}", info.last_error_code, info.last_error),
            ));
        }
        rows
    }

    /// Rows for the Last Run view
    pub fn report_rows(&self) -> Vec<PanelRow> {
        let engine = PanelRow::info("Engine", self.board.engine().state().label());
        let Some(report) = self.board.engine().last_report() else {
            return vec![engine, PanelRow::info("Last run", "none yet")];
        };

        let mut rows = vec![
            engine,
            PanelRow::info("Script", report.metadata.script.clone()),
            PanelRow::info("Started", report.metadata.started_at.clone()),
            match &report.outcome {
                RunOutcome::Completed => PanelRow::ok("Outcome", "completed"),
                RunOutcome::Aborted { reason } => PanelRow::error("Outcome", reason.clone()),
            },
            PanelRow::info("Locale", report.summary.locale.clone()),
            PanelRow::info("Lines executed", report.summary.lines_executed.to_string()),
            PanelRow::info("Repeats", report.summary.repeat_iterations.to_string()),
            PanelRow::info("Reports sent", report.summary.reports_sent.to_string()),
            PanelRow::info("Duration", format!("{} ms", report.summary.duration_ms)),
        ];
        if report.summary.lines_skipped > 0 {
            rows.push(PanelRow::warning("Skipped", report.summary.lines_skipped.to_string()));
            for skipped in &report.skipped {
                rows.push(PanelRow::warning(
                    format!("  line {}", skipped.line),
                    format!("{} ({})", skipped.text, skipped.reason),
                ));
            }
        } else {
            rows.push(PanelRow::ok("Skipped", "0"));
        }
        rows
    }

    /// Get elapsed time formatted
    pub fn elapsed_formatted(&self) -> String {
        let secs = self.start_time.elapsed().as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.board.engine().last_report()
    }

    /// Export the last run report to a JSON file
    pub fn export_report(&mut self, filename: &str) -> Result<String, std::io::Error> {
        let Some(report) = self.last_report() else {
            let msg = "No run to export".to_string();
            self.set_status(msg.clone());
            return Ok(msg);
        };
        report.export_json(Path::new(filename))?;
        let msg = format!("Exported to {}", filename);
        self.set_status(msg.clone());
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ui::RowStatus;
    use crate::keyboard::{us_layout_json, HidKeyboard, RecordingSink};
    use crate::script::ScriptEngine;
    use crate::storage::{MemoryCard, StorageSession};

    fn app_with(card: &MemoryCard) -> (App, RecordingSink) {
        let config = Config::default();
        let clock = ManualClock::new();
        let sink = RecordingSink::new(clock.clone());
        let storage = StorageSession::from_config(Box::new(card.clone()), Box::new(clock.clone()), &config.storage);
        let keyboard = HidKeyboard::new(Box::new(sink.clone()), Box::new(clock.clone()));
        let engine = ScriptEngine::new(keyboard, config.script.clone());
        let mut board = Board::new(storage, engine, &config);
        board.init();
        (App::new(config, board), sink)
    }

    fn card() -> MemoryCard {
        let card = MemoryCard::new();
        card.put_file("/languages/US.json", us_layout_json());
        card.put_file("/a.txt", "STRING a");
        card.put_file("/b.txt", "FOO\nENTER");
        card
    }

    #[test]
    fn view_cycling() {
        let (mut app, _) = app_with(&card());
        assert_eq!(app.view, AppView::Scripts);
        app.next_view();
        assert_eq!(app.view, AppView::Card);
        app.prev_view();
        app.prev_view();
        assert_eq!(app.view, AppView::Help);
        for view in AppView::all() {
            assert_eq!(AppView::from_index(view.index()), *view);
        }
    }

    #[test]
    fn selection_wraps() {
        let (mut app, _) = app_with(&card());
        assert_eq!(app.selected_script(), Some("a.txt"));
        app.select_next();
        assert_eq!(app.selected_script(), Some("b.txt"));
        app.select_next();
        assert_eq!(app.selected_script(), Some("a.txt"));
        app.select_prev();
        assert_eq!(app.selected_script(), Some("b.txt"));
    }

    #[test]
    fn run_selected_updates_report_rows() {
        let (mut app, sink) = app_with(&card());
        app.select_next();
        app.run_selected();
        assert_eq!(app.runs, 1);
        assert_eq!(sink.presses().len(), 1);

        let rows = app.report_rows();
        assert_eq!(rows[0].label, "Engine");
        assert_eq!(rows[0].value, "Completed");
        assert!(rows.iter().any(|r| r.label == "Outcome" && r.status == RowStatus::Ok));
        assert!(rows.iter().any(|r| r.label == "Skipped" && r.value == "1"));
    }

    #[test]
    fn report_rows_before_any_run_show_idle_engine() {
        let (app, _) = app_with(&card());
        let rows = app.report_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "Idle");
        assert_eq!(rows[1].value, "none yet");
    }

    #[test]
    fn card_rows_reflect_mount_state() {
        let (mut app, _) = app_with(&card());
        assert_eq!(app.card_state(), "MOUNTED");
        assert_eq!(app.card_rows()[0].status, RowStatus::Ok);

        app.toggle_mount();
        assert_eq!(app.card_state(), "NO CARD");
        assert_eq!(app.card_rows()[0].status, RowStatus::Warning);
        assert_eq!(app.selected_script(), None);
    }

    #[test]
    fn export_without_run_is_noop() {
        let (mut app, _) = app_with(&card());
        assert_eq!(app.export_report("unused.json").unwrap(), "No run to export");
        assert!(!Path::new("unused.json").exists());
    }

    #[test]
    fn status_message_expires_with_config() {
        let (mut app, _) = app_with(&card());
        app.set_status("hello".to_string());
        assert_eq!(app.get_status(), Some("hello"));
        app.config.ui.status_duration_secs = 0;
        assert_eq!(app.get_status(), None);
    }
}
