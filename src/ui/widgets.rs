//! Custom TUI widgets

use super::theme::ThemeColors;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Widget},
};

/// Severity of a panel row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Ok,
    Warning,
    Error,
    Info,
}

impl RowStatus {
    fn marker(&self) -> &'static str {
        match self {
            Self::Ok => "[OK]",
            Self::Warning => "[!!]",
            Self::Error => "[XX]",
            Self::Info => "[--]",
        }
    }
}

/// One label/value line in a results panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRow {
    pub label: String,
    pub value: String,
    pub status: RowStatus,
}

impl PanelRow {
    pub fn new(label: impl Into<String>, value: impl Into<String>, status: RowStatus) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            status,
        }
    }

    pub fn ok(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, value, RowStatus::Ok)
    }

    pub fn warning(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, value, RowStatus::Warning)
    }

    pub fn error(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, value, RowStatus::Error)
    }

    pub fn info(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(label, value, RowStatus::Info)
    }
}

/// Bordered list of label/value rows with a status marker
pub struct ResultsPanel<'a> {
    rows: &'a [PanelRow],
    title: &'a str,
    colors: ThemeColors,
}

impl<'a> ResultsPanel<'a> {
    pub fn new(rows: &'a [PanelRow], title: &'a str, colors: ThemeColors) -> Self {
        Self { rows, title, colors }
    }
}

impl Widget for ResultsPanel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(self.title)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.colors.accent));

        let inner = block.inner(area);
        block.render(area, buf);

        for (row, y) in self.rows.iter().zip(inner.y..inner.y + inner.height) {
            let color = self.colors.status(row.status);
            let line = Line::from(vec![
                Span::styled(format!("{} ", row.status.marker()), Style::default().fg(color)),
                Span::styled(
                    format!("{}: ", row.label),
                    Style::default().fg(self.colors.fg).add_modifier(Modifier::BOLD),
                ),
                Span::styled(row.value.as_str(), Style::default().fg(color)),
            ]);
            buf.set_line(inner.x, y, &line, inner.width);
        }
    }
}

/// Selectable list of script files
pub struct ScriptList<'a> {
    scripts: &'a [String],
    selected: usize,
    colors: ThemeColors,
}

impl<'a> ScriptList<'a> {
    pub fn new(scripts: &'a [String], selected: usize, colors: ThemeColors) -> Self {
        Self {
            scripts,
            selected,
            colors,
        }
    }

    /// Name shown in the list: extension dropped, long names cut at 20 chars
    pub fn display_name(name: &str) -> String {
        let stem = name.strip_suffix(".txt").unwrap_or(name);
        if stem.chars().count() > 20 {
            format!("{}...", stem.chars().take(20).collect::<String>())
        } else {
            stem.to_string()
        }
    }
}

impl Widget for ScriptList<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(format!("Scripts ({})", self.scripts.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.colors.accent));

        let inner = block.inner(area);
        block.render(area, buf);

        if self.scripts.is_empty() {
            buf.set_string(
                inner.x + 1,
                inner.y,
                "No script files found on card",
                Style::default().fg(self.colors.error),
            );
            return;
        }

        // Keep the selection on screen
        let height = inner.height as usize;
        let offset = if height == 0 { 0 } else { self.selected.saturating_sub(height - 1) };

        for (row, (i, name)) in self.scripts.iter().enumerate().skip(offset).enumerate() {
            if row >= height {
                break;
            }
            let style = if i == self.selected {
                Style::default()
                    .fg(self.colors.bg)
                    .bg(self.colors.ok)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(self.colors.fg)
            };
            let marker = if i == self.selected { ">" } else { " " };
            let label = format!("{} {}", marker, Self::display_name(name));
            buf.set_stringn(inner.x, inner.y + row as u16, &label, inner.width as usize, style);
        }
    }
}

const HELP_TEXT: &[&str] = &[
    "",
    " NAVIGATION",
    " -----------",
    " Tab / Shift+Tab  : Switch between views",
    " Up / Down        : Select a script",
    " q / Esc          : Quit application",
    "",
    " CONTROLS",
    " -----------",
    " Enter            : Run the selected script",
    " r                : Rescan the card for scripts",
    " m                : Mount / unmount the card",
    " s                : Write the default US layout to the card",
    " e                : Export the last run report to JSON",
    " b                : Boot button (toggle Scripts / Card)",
    " ?                : Show this help",
    "",
    " CARD LAYOUT",
    " -----------",
    " /*.txt              : Scripts listed in the picker",
    " /languages/XX.json  : Keyboard layout per locale",
];

/// Key bindings and card layout reference
pub struct HelpPanel {
    colors: ThemeColors,
}

impl HelpPanel {
    pub fn new(colors: ThemeColors) -> Self {
        Self { colors }
    }
}

impl Widget for HelpPanel {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title("Help - DuckyDeck")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.colors.accent));

        let inner = block.inner(area);
        block.render(area, buf);

        for (line, y) in HELP_TEXT.iter().zip(inner.y..inner.y + inner.height) {
            let style = if line.contains("---") {
                Style::default().fg(self.colors.dim)
            } else if line.chars().nth(1).is_some_and(|c| c.is_ascii_uppercase()) {
                Style::default().fg(self.colors.accent).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(self.colors.fg)
            };
            buf.set_stringn(inner.x, y, line, inner.width as usize, style);
        }
    }
}

/// One-line status bar: card state and view on the left, transient message
/// in the middle, elapsed time and run count on the right
pub struct StatusBar<'a> {
    state: &'a str,
    view: &'a str,
    elapsed: &'a str,
    runs: u64,
    message: Option<&'a str>,
    colors: ThemeColors,
}

impl<'a> StatusBar<'a> {
    pub fn new(state: &'a str, view: &'a str, elapsed: &'a str, runs: u64, colors: ThemeColors) -> Self {
        Self {
            state,
            view,
            elapsed,
            runs,
            message: None,
            colors,
        }
    }

    pub fn message(mut self, message: Option<&'a str>) -> Self {
        self.message = message;
        self
    }
}

impl Widget for StatusBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let bar = Style::default().bg(self.colors.bar).fg(self.colors.fg);
        buf.set_style(area, bar);

        let left = format!(" {} | {} ", self.state, self.view);
        buf.set_string(area.x, area.y, &left, bar.add_modifier(Modifier::BOLD));

        if let Some(msg) = self.message {
            let msg_x = area.x + (area.width / 2).saturating_sub(msg.len() as u16 / 2);
            buf.set_string(msg_x, area.y, msg, bar.fg(self.colors.warn));
        }

        let right = format!(" {} | Runs: {} ", self.elapsed, self.runs);
        let right_x = area.x + area.width.saturating_sub(right.len() as u16);
        buf.set_string(right_x, area.y, &right, bar);
    }
}

/// Tab bar widget
pub struct TabBar<'a> {
    tabs: &'a [&'a str],
    selected: usize,
    colors: ThemeColors,
}

impl<'a> TabBar<'a> {
    pub fn new(tabs: &'a [&'a str], selected: usize, colors: ThemeColors) -> Self {
        Self { tabs, selected, colors }
    }
}

impl Widget for TabBar<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        buf.set_style(area, Style::default().bg(self.colors.bar));
        let end = area.x + area.width;
        let mut x = area.x;

        for (i, tab) in self.tabs.iter().enumerate() {
            let style = if i == self.selected {
                Style::default()
                    .fg(self.colors.bg)
                    .bg(self.colors.accent)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(self.colors.fg).bg(self.colors.bar)
            };

            let label = format!(" {} ", tab);
            let width = label.len() as u16;
            if x + width > end {
                break;
            }
            buf.set_string(x, area.y, &label, style);
            x += width;

            if i + 1 < self.tabs.len() && x < end {
                buf.set_string(x, area.y, "|", Style::default().fg(self.colors.dim).bg(self.colors.bar));
                x += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_text(buf: &Buffer, y: u16) -> String {
        (0..buf.area.width)
            .map(|x| buf[(x, y)].symbol().to_string())
            .collect()
    }

    #[test]
    fn display_name_trims_extension_and_length() {
        assert_eq!(ScriptList::display_name("hello.txt"), "hello");
        assert_eq!(ScriptList::display_name("notes"), "notes");
        assert_eq!(
            ScriptList::display_name("a_really_long_payload_name.txt"),
            "a_really_long_payloa..."
        );
    }

    #[test]
    fn script_list_marks_selection() {
        let scripts = vec!["one.txt".to_string(), "two.txt".to_string()];
        let area = Rect::new(0, 0, 30, 5);
        let mut buf = Buffer::empty(area);
        ScriptList::new(&scripts, 1, ThemeColors::dark()).render(area, &mut buf);

        assert!(row_text(&buf, 1).contains("  one"));
        assert!(row_text(&buf, 2).contains("> two"));
    }

    #[test]
    fn script_list_scrolls_to_selection() {
        let scripts: Vec<String> = (0..10).map(|i| format!("s{}.txt", i)).collect();
        let area = Rect::new(0, 0, 20, 5);
        let mut buf = Buffer::empty(area);
        ScriptList::new(&scripts, 7, ThemeColors::dark()).render(area, &mut buf);

        // three visible rows, selection on the last one
        assert!(row_text(&buf, 1).contains("s5"));
        assert!(row_text(&buf, 3).contains("> s7"));
    }

    #[test]
    fn script_list_empty_message() {
        let area = Rect::new(0, 0, 40, 4);
        let mut buf = Buffer::empty(area);
        ScriptList::new(&[], 0, ThemeColors::dark()).render(area, &mut buf);
        assert!(row_text(&buf, 1).contains("No script files"));
    }

    #[test]
    fn results_panel_renders_rows() {
        let colors = ThemeColors::dark();
        let rows = vec![PanelRow::ok("Mounted", "yes"), PanelRow::error("Last error", "[11]")];
        let area = Rect::new(0, 0, 40, 5);
        let mut buf = Buffer::empty(area);
        ResultsPanel::new(&rows, "Card", colors).render(area, &mut buf);

        assert!(row_text(&buf, 1).contains("[OK] Mounted: yes"));
        assert!(row_text(&buf, 2).contains("[XX] Last error: [11]"));
        assert_eq!(buf[(1, 2)].fg, colors.error);
    }

    #[test]
    fn status_bar_shows_runs() {
        let area = Rect::new(0, 0, 60, 1);
        let mut buf = Buffer::empty(area);
        StatusBar::new("MOUNTED", "Scripts", "00:05", 3, ThemeColors::dark()).render(area, &mut buf);
        let text = row_text(&buf, 0);
        assert!(text.contains("MOUNTED | Scripts"));
        assert!(text.contains("Runs: 3"));
    }

    #[test]
    fn tab_bar_highlights_selected() {
        let colors = ThemeColors::light();
        let area = Rect::new(0, 0, 40, 1);
        let mut buf = Buffer::empty(area);
        TabBar::new(&["Scripts", "Card"], 1, colors).render(area, &mut buf);

        assert!(row_text(&buf, 0).starts_with(" Scripts | Card "));
        assert_eq!(buf[(12, 0)].bg, colors.accent);
        assert_eq!(buf[(2, 0)].bg, colors.bar);
    }
}
