//! DuckyDeck - keystroke script runner
//!
//! Picks scripts from a removable card and plays them through a USB gadget
//! keyboard.

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode as CtKeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::{info, warn};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Terminal,
};
use std::fs::File;
use std::io::stdout;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use duckydeck::{
    board::Board,
    clock::SystemClock,
    config::{self, Config},
    keyboard::{HidKeyboard, HidgSink, KeyReportSink, NullSink},
    report::RunReport,
    script::ScriptEngine,
    storage::{HostDirCard, StorageSession},
    ui::{App, AppState, AppView, HelpPanel, ResultsPanel, ScriptList, StatusBar, TabBar, ThemeColors},
};

#[derive(Debug, Parser)]
#[command(name = "duckydeck")]
#[command(about = "Play keystroke scripts from a removable card through a USB gadget keyboard", long_about = None)]
struct Args {
    /// Write the built-in US layout to the card and exit
    #[arg(long)]
    seed: bool,
    /// Discard HID reports instead of opening the gadget device
    #[arg(long)]
    dry_run: bool,
    /// Override the configured card directory
    #[arg(long, value_name = "DIR")]
    card: Option<PathBuf>,
}

/// Log to a file next to the config so the terminal UI stays clean
fn init_logging() -> Result<()> {
    let path = config::config_dir()?.join("duckydeck.log");
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .init();
    Ok(())
}

fn open_sink(config: &Config, dry_run: bool) -> (Box<dyn KeyReportSink>, Option<String>) {
    if dry_run {
        return (Box::new(NullSink), Some("Dry run: HID output disabled".to_string()));
    }
    match HidgSink::open(&config.hid.device) {
        Ok(sink) => (Box::new(sink), None),
        Err(e) => {
            warn!("{}", e);
            (Box::new(NullSink), Some(format!("No HID gadget ({}), output disabled", config.hid.device.display())))
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if let Err(e) = init_logging() {
        eprintln!("Logging disabled: {:#}", e);
    }

    let mut config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });
    if let Some(card) = args.card {
        config.storage.card_root = card;
    }
    info!("Card root: {}", config.storage.card_root.display());

    let storage = StorageSession::from_config(
        Box::new(HostDirCard::new(&config.storage.card_root)),
        Box::new(SystemClock::new()),
        &config.storage,
    );
    let (sink, sink_status) = open_sink(&config, args.dry_run || args.seed);
    let keyboard = HidKeyboard::with_config(sink, Box::new(SystemClock::new()), &config.hid);
    let engine = ScriptEngine::new(keyboard, config.script.clone());
    let mut board = Board::new(storage, engine, &config);
    board.init();

    if args.seed {
        let wrote = board
            .seed_layout()
            .with_context(|| format!("seeding layout on {}", config.storage.card_root.display()))?;
        if wrote {
            println!("Wrote US layout to {}", config.storage.card_root.display());
        } else {
            println!("US layout already present");
        }
        board.teardown();
        return Ok(());
    }

    let quit = Arc::new(AtomicBool::new(false));
    {
        let quit = Arc::clone(&quit);
        ctrlc::set_handler(move || quit.store(true, Ordering::SeqCst))
            .context("installing signal handler")?;
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let colors = ThemeColors::from_theme(config.ui.theme);
    let tick_rate = config.refresh_interval();
    let mut app = App::new(config, board);
    if let Some(status) = sink_status {
        app.set_status(status);
    }

    let result = run_loop(&mut terminal, &mut app, colors, tick_rate, &quit);

    // Cleanup terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    app.board.teardown();
    result?;

    println!("\nDuckyDeck session complete.");
    println!("Scripts run: {}", app.runs);
    println!("Session duration: {}", app.elapsed_formatted());

    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    app: &mut App,
    colors: ThemeColors,
    tick_rate: std::time::Duration,
    quit: &AtomicBool,
) -> Result<()> {
    loop {
        app.tick();

        terminal.draw(|frame| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([
                    Constraint::Length(1), // Tab bar
                    Constraint::Min(8),    // Main content
                    Constraint::Length(1), // Status bar
                ])
                .split(frame.area());

            let tab_names: Vec<&str> = AppView::all().iter().map(|v| v.name()).collect();
            frame.render_widget(TabBar::new(&tab_names, app.view.index(), colors), chunks[0]);

            match app.view {
                AppView::Scripts => {
                    let list = ScriptList::new(app.board.scripts(), app.selected, colors);
                    frame.render_widget(list, chunks[1]);
                }
                AppView::Card => {
                    let rows = app.card_rows();
                    frame.render_widget(ResultsPanel::new(&rows, "Card", colors), chunks[1]);
                }
                AppView::Report => {
                    let rows = app.report_rows();
                    frame.render_widget(ResultsPanel::new(&rows, "Last Run", colors), chunks[1]);
                }
                AppView::Help => frame.render_widget(HelpPanel::new(colors), chunks[1]),
            }

            let elapsed = app.elapsed_formatted();
            let status = StatusBar::new(app.card_state(), app.view.name(), &elapsed, app.runs, colors)
                .message(app.get_status());
            frame.render_widget(status, chunks[2]);
        })?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    CtKeyCode::Char('q') | CtKeyCode::Esc => app.quit(),
                    CtKeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => app.quit(),
                    CtKeyCode::Tab if key.modifiers.contains(KeyModifiers::SHIFT) => app.prev_view(),
                    CtKeyCode::BackTab => app.prev_view(),
                    CtKeyCode::Tab => app.next_view(),
                    CtKeyCode::Up => app.select_prev(),
                    CtKeyCode::Down => app.select_next(),
                    CtKeyCode::Enter if app.view == AppView::Scripts => app.run_selected(),
                    CtKeyCode::Char('r') => app.rescan(),
                    CtKeyCode::Char('m') => app.toggle_mount(),
                    CtKeyCode::Char('s') => app.seed_layout(),
                    CtKeyCode::Char('b') => app.press_button(),
                    CtKeyCode::Char('?') => app.view = AppView::Help,
                    CtKeyCode::Char('e') => {
                        if let Err(e) = app.export_report(&RunReport::default_filename()) {
                            app.set_status(format!("Export failed: {}", e));
                        }
                    }
                    _ => {}
                }
            }
        }

        if quit.load(Ordering::SeqCst) {
            app.quit();
        }
        if app.state == AppState::Quitting {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = Args::try_parse_from(["duckydeck", "--seed", "--card", "/tmp/card"]).unwrap();
        assert!(args.seed);
        assert!(!args.dry_run);
        assert_eq!(args.card, Some(PathBuf::from("/tmp/card")));

        let args = Args::try_parse_from(["duckydeck", "--dry-run"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.card, None);
    }

    #[test]
    fn bad_flags_are_rejected() {
        assert!(Args::try_parse_from(["duckydeck", "--bogus"]).is_err());
        assert!(Args::try_parse_from(["duckydeck", "--card"]).is_err());
    }
}
